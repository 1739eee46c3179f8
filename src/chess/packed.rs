//! Компактные кодировки: позиция (24 байта), ход (2 байта BE),
//! reverse move (27-битное поле ключа), move-index кодирование BCGN.
//!
//! CompressedPosition (24 байта):
//!   [occupancy u64 BE]  — бит i = клетка i занята (a1 = бит 0)
//!   [16 байт ниблов]    — по ниблу на занятую клетку в порядке возрастания,
//!                         старший нибл первым
//! Ниблы: 0..11 = ordinal фигуры; 12 = пешка, битая en passant;
//! 13 = ладья с непотерянным правом рокировки; 14 = король стороны,
//! которая ходит (цвет восстанавливается по второму королю).
//!
//! CompressedMove (u16 BE): [type:2][from:6][to:6][promo:2],
//! promo: 0=N 1=B 2=R 3=Q (значим только для превращений).
//!
//! PackedReverseMove (27 бит, значимы 18): [type:2][from:6][to:6][promo:4],
//! promo = ordinal типа фигуры + 1, 0 = нет. Нулевое поле = «ход неизвестен».

use anyhow::{anyhow, Result};

use super::position::{
    CASTLE_BLACK_KING, CASTLE_BLACK_QUEEN, CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN,
};
use super::{Color, Move, MoveType, Piece, PieceType, Position, Square};

// ---------------- CompressedPosition ----------------

const NIBBLE_EP_PAWN: u8 = 12;
const NIBBLE_CASTLE_ROOK: u8 = 13;
const NIBBLE_STM_KING: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedPosition {
    bytes: [u8; 24],
}

impl CompressedPosition {
    pub const SIZE: usize = 24;

    pub fn compress(pos: &Position) -> CompressedPosition {
        let mut occupancy = 0u64;
        let mut nibbles: Vec<u8> = Vec::with_capacity(32);

        for idx in 0..64u8 {
            let sq = Square(idx);
            let piece = match pos.board().piece_at(sq) {
                Some(p) => p,
                None => continue,
            };
            occupancy |= 1u64 << idx;
            nibbles.push(nibble_for(pos, sq, piece));
        }

        let mut bytes = [0u8; 24];
        bytes[..8].copy_from_slice(&occupancy.to_be_bytes());
        for (i, nib) in nibbles.iter().enumerate() {
            let byte = &mut bytes[8 + i / 2];
            if i % 2 == 0 {
                *byte |= nib << 4;
            } else {
                *byte |= nib;
            }
        }
        CompressedPosition { bytes }
    }

    pub fn decompress(&self) -> Result<Position> {
        let occupancy = u64::from_be_bytes(self.bytes[..8].try_into().unwrap());

        let mut pos = Position::from_fen("8/8/8/8/8/8/8/8 w - - 0 1")?;
        let mut castling = 0u8;
        let mut ep: Option<Square> = None;
        let mut plain_king_color: Option<Color> = None;
        let mut stm_king_square: Option<Square> = None;

        let nibble_at = |i: usize| -> u8 {
            let byte = self.bytes[8 + i / 2];
            if i % 2 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            }
        };

        let mut nibble_idx = 0usize;
        for idx in 0..64u8 {
            if occupancy & (1u64 << idx) == 0 {
                continue;
            }
            if nibble_idx >= 32 {
                return Err(anyhow!("compressed position has more than 32 pieces"));
            }
            let sq = Square(idx);
            let nib = nibble_at(nibble_idx);
            nibble_idx += 1;

            match nib {
                0..=11 => {
                    let piece = Piece::from_ordinal(nib);
                    if piece.kind == PieceType::King {
                        plain_king_color = Some(piece.color);
                    }
                    pos.board_mut().set(sq, Some(piece));
                }
                NIBBLE_EP_PAWN => {
                    // Ранг пешки определяет её цвет и клетку взятия.
                    let (color, ep_rank) = match sq.rank() {
                        3 => (Color::White, 2),
                        4 => (Color::Black, 5),
                        r => return Err(anyhow!("ep pawn on invalid rank {}", r)),
                    };
                    ep = Some(Square::new(sq.file(), ep_rank));
                    pos.board_mut()
                        .set(sq, Some(Piece::new(PieceType::Pawn, color)));
                }
                NIBBLE_CASTLE_ROOK => {
                    let color = match sq.rank() {
                        0 => Color::White,
                        7 => Color::Black,
                        r => return Err(anyhow!("castle rook on invalid rank {}", r)),
                    };
                    castling |= match (color, sq.file()) {
                        (Color::White, 0) => CASTLE_WHITE_QUEEN,
                        (Color::White, 7) => CASTLE_WHITE_KING,
                        (Color::Black, 0) => CASTLE_BLACK_QUEEN,
                        (Color::Black, 7) => CASTLE_BLACK_KING,
                        (_, f) => return Err(anyhow!("castle rook on invalid file {}", f)),
                    };
                    pos.board_mut()
                        .set(sq, Some(Piece::new(PieceType::Rook, color)));
                }
                NIBBLE_STM_KING => {
                    stm_king_square = Some(sq);
                }
                other => return Err(anyhow!("invalid position nibble {}", other)),
            }
        }

        let stm_sq =
            stm_king_square.ok_or_else(|| anyhow!("compressed position lacks a moving king"))?;
        let stm = plain_king_color
            .ok_or_else(|| anyhow!("compressed position lacks the opponent king"))?
            .opposite();
        pos.board_mut()
            .set(stm_sq, Some(Piece::new(PieceType::King, stm)));

        pos.set_side_to_move(stm);
        pos.set_castling_rights(castling);
        pos.set_ep_square(ep);
        Ok(pos)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.bytes
    }

    pub fn from_bytes(bytes: [u8; 24]) -> CompressedPosition {
        CompressedPosition { bytes }
    }
}

fn nibble_for(pos: &Position, sq: Square, piece: Piece) -> u8 {
    match piece.kind {
        PieceType::Pawn => {
            if let Some(ep) = pos.ep_square() {
                let behind = match piece.color {
                    Color::White => sq.rank() == 3 && ep == Square::new(sq.file(), 2),
                    Color::Black => sq.rank() == 4 && ep == Square::new(sq.file(), 5),
                };
                if behind {
                    return NIBBLE_EP_PAWN;
                }
            }
            piece.ordinal()
        }
        PieceType::Rook => {
            let right = match (piece.color, sq.file(), sq.rank()) {
                (Color::White, 0, 0) => CASTLE_WHITE_QUEEN,
                (Color::White, 7, 0) => CASTLE_WHITE_KING,
                (Color::Black, 0, 7) => CASTLE_BLACK_QUEEN,
                (Color::Black, 7, 7) => CASTLE_BLACK_KING,
                _ => 0,
            };
            if right != 0 && pos.castling_rights() & right != 0 {
                NIBBLE_CASTLE_ROOK
            } else {
                piece.ordinal()
            }
        }
        PieceType::King => {
            if piece.color == pos.side_to_move() {
                NIBBLE_STM_KING
            } else {
                piece.ordinal()
            }
        }
        _ => piece.ordinal(),
    }
}

// ---------------- CompressedMove ----------------

fn promo_code(kind: Option<PieceType>) -> u16 {
    match kind {
        Some(PieceType::Knight) => 0,
        Some(PieceType::Bishop) => 1,
        Some(PieceType::Rook) => 2,
        Some(PieceType::Queen) => 3,
        _ => 0,
    }
}

fn promo_from_code(code: u16) -> PieceType {
    match code {
        0 => PieceType::Knight,
        1 => PieceType::Bishop,
        2 => PieceType::Rook,
        _ => PieceType::Queen,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedMove(u16);

impl CompressedMove {
    pub const SIZE: usize = 2;

    pub fn compress(m: Move) -> CompressedMove {
        let packed = ((m.kind.ordinal() as u16) << 14)
            | ((m.from.0 as u16) << 8)
            | ((m.to.0 as u16) << 2)
            | promo_code(m.promotion);
        CompressedMove(packed)
    }

    pub fn decompress(self) -> Move {
        let kind = MoveType::from_ordinal(((self.0 >> 14) & 0b11) as u8);
        let from = Square(((self.0 >> 8) & 0x3F) as u8);
        let to = Square(((self.0 >> 2) & 0x3F) as u8);
        let promotion = match kind {
            MoveType::Promotion => Some(promo_from_code(self.0 & 0b11)),
            _ => None,
        };
        Move {
            from,
            to,
            kind,
            promotion,
        }
    }

    pub fn write_to_big_endian(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.0.to_be_bytes());
    }

    pub fn read_from_big_endian(data: &[u8]) -> CompressedMove {
        CompressedMove(u16::from_be_bytes([data[0], data[1]]))
    }
}

// ---------------- PackedReverseMove ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedReverseMove(u32);

impl PackedReverseMove {
    /// Ширина поля в ключе entry. Кодировке хватает 18 бит; поле шире,
    /// чтобы раскладка limb 3 пережила рост кодировки.
    pub const NUM_BITS: u32 = 27;
    pub const MASK: u32 = (1 << Self::NUM_BITS) - 1;

    /// None => 0 («ход, приведший к позиции, неизвестен»). Реальный ход
    /// никогда не кодируется нулём: from == to у легального хода невозможно.
    pub fn pack(m: Option<Move>) -> PackedReverseMove {
        match m {
            None => PackedReverseMove(0),
            Some(m) => {
                let promo = m
                    .promotion
                    .map(|p| p.ordinal() as u32 + 1)
                    .unwrap_or(0);
                PackedReverseMove(
                    ((m.kind.ordinal() as u32) << 16)
                        | ((m.from.0 as u32) << 10)
                        | ((m.to.0 as u32) << 4)
                        | promo,
                )
            }
        }
    }

    #[inline]
    pub fn packed(self) -> u32 {
        self.0
    }
}

// ---------------- Move-index coding (BCGN compression level 1) ----------------

/// Верхняя оценка числа ходов стороны, которой принадлежит очередь.
/// Короткая (однобайтовая) кодировка допустима, пока оценка помещается в 256.
fn move_count_upper_bound(pos: &Position) -> u32 {
    let us = pos.side_to_move();
    let mut bound = 0u32;
    for idx in 0..64u8 {
        if let Some(p) = pos.board().piece_at(Square(idx)) {
            if p.color != us {
                continue;
            }
            bound += match p.kind {
                PieceType::Pawn => 12, // 3 направления x 4 превращения
                PieceType::Knight => 8,
                PieceType::Bishop => 13,
                PieceType::Rook => 14,
                PieceType::Queen => 27,
                PieceType::King => 10, // 8 + две рокировки
            };
        }
    }
    bound
}

#[inline]
pub fn requires_long_move_index(pos: &Position) -> bool {
    move_count_upper_bound(pos) > 256
}

pub fn move_to_index(pos: &Position, m: Move) -> Result<u16> {
    pos.legal_moves()
        .iter()
        .position(|&cand| cand == m)
        .map(|i| i as u16)
        .ok_or_else(|| anyhow!("move is not legal in this position"))
}

pub fn index_to_move(pos: &Position, index: u16) -> Result<Move> {
    pos.legal_moves()
        .get(index as usize)
        .copied()
        .ok_or_else(|| anyhow!("move index {} out of range", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::san::parse_san;

    #[test]
    fn compressed_position_roundtrip_start() {
        let pos = Position::start();
        let cp = CompressedPosition::compress(&pos);
        let back = cp.decompress().unwrap();
        assert_eq!(back.pieces_raw(), pos.pieces_raw());
        assert_eq!(back.side_to_move(), pos.side_to_move());
        assert_eq!(back.castling_rights(), pos.castling_rights());
        assert_eq!(back.ep_square(), pos.ep_square());
    }

    #[test]
    fn compressed_position_roundtrip_ep_and_castling() {
        let mut pos = Position::start();
        let m = parse_san(&pos, "e4").unwrap();
        pos.do_move(m);
        assert!(pos.ep_square().is_some());

        let cp = CompressedPosition::compress(&pos);
        let back = cp.decompress().unwrap();
        assert_eq!(back.ep_square(), pos.ep_square());
        assert_eq!(back.castling_rights(), pos.castling_rights());
        assert_eq!(back.side_to_move(), Color::Black);
    }

    #[test]
    fn compressed_move_roundtrip() {
        let pos = Position::start();
        for m in pos.legal_moves() {
            let mut buf = [0u8; 2];
            CompressedMove::compress(m).write_to_big_endian(&mut buf);
            let back = CompressedMove::read_from_big_endian(&buf).decompress();
            assert_eq!(back, m);
        }
    }

    #[test]
    fn packed_reverse_move_nonzero_and_bounded() {
        let pos = Position::start();
        for m in pos.legal_moves() {
            let packed = PackedReverseMove::pack(Some(m)).packed();
            assert_ne!(packed, 0);
            assert_eq!(packed & !PackedReverseMove::MASK, 0);
        }
        assert_eq!(PackedReverseMove::pack(None).packed(), 0);
    }

    #[test]
    fn start_position_uses_short_indices() {
        assert!(!requires_long_move_index(&Position::start()));
    }

    #[test]
    fn heavy_material_requires_long_indices() {
        // Десять ферзей поднимают верхнюю оценку за 256.
        let pos = Position::from_fen("4k3/8/8/8/8/8/QQQQQ3/QQQQQK2 w - - 0 1").unwrap();
        assert!(requires_long_move_index(&pos));
    }

    #[test]
    fn move_index_roundtrip() {
        let pos = Position::start();
        for (i, m) in pos.legal_moves().into_iter().enumerate() {
            assert_eq!(move_to_index(&pos, m).unwrap(), i as u16);
            assert_eq!(index_to_move(&pos, i as u16).unwrap(), m);
        }
    }
}
