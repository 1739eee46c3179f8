//! Разбор и печать SAN против конкретной позиции.
//!
//! Разбор устойчив к суффиксам (+, #, !, ?) и NAG-остаткам; стратегия —
//! сопоставление с легальными ходами позиции, а не самостоятельная
//! интерпретация: токен задаёт фильтр (тип фигуры, поле назначения,
//! дизамбигуация, превращение), подходить должен ровно один ход.

use anyhow::{anyhow, Result};

use super::{Move, MoveType, PieceType, Position, Square};

/// Может ли байт начинать SAN-токен (фигура, пешечный ход, рокировка).
#[inline]
pub fn is_valid_san_start(c: u8) -> bool {
    matches!(c, b'a'..=b'h' | b'N' | b'B' | b'R' | b'Q' | b'K' | b'O' | b'0')
}

fn piece_letter(kind: PieceType) -> Option<char> {
    match kind {
        PieceType::Pawn => None,
        PieceType::Knight => Some('N'),
        PieceType::Bishop => Some('B'),
        PieceType::Rook => Some('R'),
        PieceType::Queen => Some('Q'),
        PieceType::King => Some('K'),
    }
}

fn piece_from_letter(c: u8) -> Option<PieceType> {
    match c {
        b'N' => Some(PieceType::Knight),
        b'B' => Some(PieceType::Bishop),
        b'R' => Some(PieceType::Rook),
        b'Q' => Some(PieceType::Queen),
        b'K' => Some(PieceType::King),
        _ => None,
    }
}

/// Разобрать SAN-токен против позиции.
pub fn parse_san(pos: &Position, san: &str) -> Result<Move> {
    let trimmed = san.trim_end_matches(['+', '#', '!', '?']);
    if trimmed.is_empty() {
        return Err(anyhow!("empty SAN token"));
    }

    let legal = pos.legal_moves();

    // Рокировки.
    if trimmed == "O-O-O" || trimmed == "0-0-0" {
        return legal
            .into_iter()
            .find(|m| m.kind == MoveType::Castling && m.to.file() == 2)
            .ok_or_else(|| anyhow!("illegal SAN '{}'", san));
    }
    if trimmed == "O-O" || trimmed == "0-0" {
        return legal
            .into_iter()
            .find(|m| m.kind == MoveType::Castling && m.to.file() == 6)
            .ok_or_else(|| anyhow!("illegal SAN '{}'", san));
    }

    let mut bytes = trimmed.as_bytes();

    let kind = match piece_from_letter(bytes[0]) {
        Some(k) => {
            bytes = &bytes[1..];
            k
        }
        None => PieceType::Pawn,
    };

    // Превращение: "=Q" или завершающая буква фигуры у пешечного хода.
    let mut promotion: Option<PieceType> = None;
    if bytes.len() >= 2 && bytes[bytes.len() - 2] == b'=' {
        promotion = piece_from_letter(bytes[bytes.len() - 1]);
        if promotion.is_none() {
            return Err(anyhow!("bad promotion in SAN '{}'", san));
        }
        bytes = &bytes[..bytes.len() - 2];
    } else if kind == PieceType::Pawn && !bytes.is_empty() {
        if let Some(p) = piece_from_letter(bytes[bytes.len() - 1]) {
            promotion = Some(p);
            bytes = &bytes[..bytes.len() - 1];
        }
    }

    if bytes.len() < 2 {
        return Err(anyhow!("truncated SAN '{}'", san));
    }
    let dest = Square::from_name(std::str::from_utf8(&bytes[bytes.len() - 2..])?)?;
    let middle = &bytes[..bytes.len() - 2];

    let mut dis_file: Option<u8> = None;
    let mut dis_rank: Option<u8> = None;
    for &c in middle {
        match c {
            b'x' => {}
            b'a'..=b'h' => dis_file = Some(c - b'a'),
            b'1'..=b'8' => dis_rank = Some(c - b'1'),
            _ => return Err(anyhow!("bad SAN char '{}' in '{}'", c as char, san)),
        }
    }

    let mut candidates = legal.into_iter().filter(|m| {
        pos.board().piece_at(m.from).map(|p| p.kind) == Some(kind)
            && m.to == dest
            && m.kind != MoveType::Castling
            && m.promotion == promotion
            && dis_file.map_or(true, |f| m.from.file() == f)
            && dis_rank.map_or(true, |r| m.from.rank() == r)
    });

    match (candidates.next(), candidates.next()) {
        (Some(m), None) => Ok(m),
        (None, _) => Err(anyhow!("illegal SAN '{}'", san)),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous SAN '{}'", san)),
    }
}

/// Напечатать ход в SAN (с минимальной дизамбигуацией и суффиксом шаха/мата).
pub fn move_to_san(pos: &Position, m: Move) -> String {
    let mut out = String::new();

    if m.kind == MoveType::Castling {
        out.push_str(if m.to.file() == 6 { "O-O" } else { "O-O-O" });
    } else {
        let piece = pos.board().piece_at(m.from).expect("san of empty square");
        let capture =
            pos.board().piece_at(m.to).is_some() || m.kind == MoveType::EnPassant;

        match piece_letter(piece.kind) {
            None => {
                if capture {
                    out.push((b'a' + m.from.file()) as char);
                    out.push('x');
                }
                out.push_str(&m.to.name());
                if let Some(promo) = m.promotion {
                    out.push('=');
                    out.push(piece_letter(promo).expect("pawn promotion piece"));
                }
            }
            Some(letter) => {
                out.push(letter);

                let rivals: Vec<Square> = pos
                    .legal_moves()
                    .into_iter()
                    .filter(|o| {
                        o.from != m.from
                            && o.to == m.to
                            && o.kind != MoveType::Castling
                            && pos.board().piece_at(o.from).map(|p| p.kind)
                                == Some(piece.kind)
                    })
                    .map(|o| o.from)
                    .collect();
                if !rivals.is_empty() {
                    let file_unique = rivals.iter().all(|s| s.file() != m.from.file());
                    let rank_unique = rivals.iter().all(|s| s.rank() != m.from.rank());
                    if file_unique {
                        out.push((b'a' + m.from.file()) as char);
                    } else if rank_unique {
                        out.push((b'1' + m.from.rank()) as char);
                    } else {
                        out.push((b'a' + m.from.file()) as char);
                        out.push((b'1' + m.from.rank()) as char);
                    }
                }

                if capture {
                    out.push('x');
                }
                out.push_str(&m.to.name());
            }
        }
    }

    let next = pos.after_move(m);
    if next.in_check(next.side_to_move()) {
        out.push(if next.legal_moves().is_empty() {
            '#'
        } else {
            '+'
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Color;

    fn apply(pos: &mut Position, san: &str) {
        let m = parse_san(pos, san).unwrap();
        pos.do_move(m);
    }

    #[test]
    fn mainline_opening() {
        let mut pos = Position::start();
        for san in ["e4", "e5", "Nf3", "Nc6", "Bb5"] {
            apply(&mut pos, san);
        }
        // Испанская партия.
        assert_eq!(
            pos.fen(),
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3"
        );
    }

    #[test]
    fn san_roundtrip_through_formatter() {
        let mut pos = Position::start();
        for san in ["d4", "d5", "c4", "e6", "Nc3", "Nf6", "Bg5", "Be7"] {
            let m = parse_san(&pos, san).unwrap();
            assert_eq!(move_to_san(&pos, m), san.to_string());
            pos.do_move(m);
        }
    }

    #[test]
    fn disambiguation_by_file() {
        let pos =
            Position::from_fen("4k3/8/8/8/8/8/8/R3K2R w KQ - 0 1").unwrap();
        let m = parse_san(&pos, "Rad1").unwrap();
        assert_eq!(m.from, Square::from_name("a1").unwrap());
        assert_eq!(move_to_san(&pos, m), "Rad1");
    }

    #[test]
    fn scholars_mate_suffix() {
        let mut pos = Position::start();
        for san in ["e4", "e5", "Bc4", "Nc6", "Qh5", "Nf6"] {
            apply(&mut pos, san);
        }
        let m = parse_san(&pos, "Qxf7#").unwrap();
        assert_eq!(move_to_san(&pos, m), "Qxf7#");
        pos.do_move(m);
        assert!(pos.in_check(Color::Black));
        assert!(pos.legal_moves().is_empty());
    }

    #[test]
    fn checks_get_plus_suffix() {
        let mut pos = Position::start();
        for san in ["e4", "e5", "Qh5", "Nc6"] {
            apply(&mut pos, san);
        }
        let m = parse_san(&pos, "Qxf7+").unwrap();
        assert_eq!(move_to_san(&pos, m), "Qxf7+");
    }
}
