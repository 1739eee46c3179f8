//! Доска 8x8 (mailbox) и позиция: FEN, применение хода, легальные ходы.
//!
//! Генерация ходов: псевдолегальные ходы + фильтр «свой король не под боем
//! после применения». Порядок перечисления детерминирован (клетки a1..h8,
//! фиксированный порядок направлений) — на этом порядке держится короткая
//! move-index кодировка BCGN.

use anyhow::{anyhow, bail, Result};

use super::{Color, Move, MoveType, Piece, PieceType, Square, EMPTY_SQUARE};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

// Права рокировки (битовая маска).
pub const CASTLE_WHITE_KING: u8 = 0b0001;
pub const CASTLE_WHITE_QUEEN: u8 = 0b0010;
pub const CASTLE_BLACK_KING: u8 = 0b0100;
pub const CASTLE_BLACK_QUEEN: u8 = 0b1000;

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];
const KING_OFFSETS: [(i8, i8); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];
const ROOK_DIRS: [(i8, i8); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, -1), (-1, 1)];

const PROMOTION_KINDS: [PieceType; 4] = [
    PieceType::Queen,
    PieceType::Rook,
    PieceType::Bishop,
    PieceType::Knight,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
}

impl Board {
    pub fn empty() -> Board {
        Board {
            squares: [None; 64],
        }
    }

    #[inline]
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    #[inline]
    pub fn set(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.index()] = piece;
    }

    /// Сырой placement для сигнатуры позиции: ordinal фигуры или EMPTY_SQUARE.
    pub fn raw(&self) -> [u8; 64] {
        let mut out = [EMPTY_SQUARE; 64];
        for (i, p) in self.squares.iter().enumerate() {
            if let Some(p) = p {
                out[i] = p.ordinal();
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    board: Board,
    side_to_move: Color,
    castling: u8,
    ep_square: Option<Square>,
    halfmove_clock: u16,
    fullmove_number: u16,
}

impl Position {
    pub fn start() -> Position {
        // START_FEN всегда корректен.
        Position::from_fen(START_FEN).expect("start fen")
    }

    pub fn from_fen(fen: &str) -> Result<Position> {
        let mut fields = fen.split_whitespace();

        let placement = fields.next().ok_or_else(|| anyhow!("empty FEN"))?;
        let mut board = Board::empty();
        let mut rank: i8 = 7;
        let mut file: i8 = 0;
        for c in placement.chars() {
            match c {
                '/' => {
                    if file != 8 {
                        bail!("bad FEN rank (file={})", file);
                    }
                    rank -= 1;
                    file = 0;
                    if rank < 0 {
                        bail!("too many FEN ranks");
                    }
                }
                '1'..='8' => {
                    file += c as i8 - '0' as i8;
                    if file > 8 {
                        bail!("FEN rank overflow");
                    }
                }
                _ => {
                    let piece =
                        Piece::from_char(c).ok_or_else(|| anyhow!("bad FEN piece '{}'", c))?;
                    if file >= 8 {
                        bail!("FEN rank overflow");
                    }
                    board.set(Square::new(file as u8, rank as u8), Some(piece));
                    file += 1;
                }
            }
        }
        if rank != 0 || file != 8 {
            bail!("incomplete FEN placement");
        }

        let stm = match fields.next() {
            Some("w") => Color::White,
            Some("b") => Color::Black,
            other => bail!("bad FEN side to move: {:?}", other),
        };

        let mut castling = 0u8;
        match fields.next() {
            None | Some("-") => {}
            Some(rights) => {
                for c in rights.chars() {
                    castling |= match c {
                        'K' => CASTLE_WHITE_KING,
                        'Q' => CASTLE_WHITE_QUEEN,
                        'k' => CASTLE_BLACK_KING,
                        'q' => CASTLE_BLACK_QUEEN,
                        _ => bail!("bad FEN castling '{}'", c),
                    };
                }
            }
        }

        let ep_square = match fields.next() {
            None | Some("-") => None,
            Some(sq) => Some(Square::from_name(sq)?),
        };

        let halfmove_clock = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let fullmove_number = fields.next().and_then(|s| s.parse().ok()).unwrap_or(1);

        Ok(Position {
            board,
            side_to_move: stm,
            castling,
            ep_square,
            halfmove_clock,
            fullmove_number,
        })
    }

    pub fn fen(&self) -> String {
        let mut out = String::new();
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                match self.board.piece_at(Square::new(file, rank)) {
                    Some(p) => {
                        if empty > 0 {
                            out.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        out.push(p.to_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
            if rank > 0 {
                out.push('/');
            }
        }
        out.push(' ');
        out.push(match self.side_to_move {
            Color::White => 'w',
            Color::Black => 'b',
        });
        out.push(' ');
        if self.castling == 0 {
            out.push('-');
        } else {
            if self.castling & CASTLE_WHITE_KING != 0 {
                out.push('K');
            }
            if self.castling & CASTLE_WHITE_QUEEN != 0 {
                out.push('Q');
            }
            if self.castling & CASTLE_BLACK_KING != 0 {
                out.push('k');
            }
            if self.castling & CASTLE_BLACK_QUEEN != 0 {
                out.push('q');
            }
        }
        out.push(' ');
        match self.ep_square {
            Some(sq) => out.push_str(&sq.name()),
            None => out.push('-'),
        }
        out.push_str(&format!(
            " {} {}",
            self.halfmove_clock, self.fullmove_number
        ));
        out
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[inline]
    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn castling_rights(&self) -> u8 {
        self.castling
    }

    #[inline]
    pub fn ep_square(&self) -> Option<Square> {
        self.ep_square
    }

    #[inline]
    pub fn pieces_raw(&self) -> [u8; 64] {
        self.board.raw()
    }

    pub fn set_castling_rights(&mut self, rights: u8) {
        self.castling = rights;
    }

    pub fn set_ep_square(&mut self, ep: Option<Square>) {
        self.ep_square = ep;
    }

    pub fn set_side_to_move(&mut self, stm: Color) {
        self.side_to_move = stm;
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        let king = Piece::new(PieceType::King, color);
        (0..64)
            .map(Square)
            .find(|&sq| self.board.piece_at(sq) == Some(king))
    }

    /// Атакована ли клетка стороной `by`.
    pub fn is_square_attacked(&self, sq: Square, by: Color) -> bool {
        // Пешки: атакующая пешка стоит на ранг ниже (для белых) цели.
        let dr: i8 = match by {
            Color::White => -1,
            Color::Black => 1,
        };
        for df in [-1i8, 1] {
            if let Some(from) = sq.offset(df, dr) {
                if self.board.piece_at(from) == Some(Piece::new(PieceType::Pawn, by)) {
                    return true;
                }
            }
        }

        for (df, dr) in KNIGHT_OFFSETS {
            if let Some(from) = sq.offset(df, dr) {
                if self.board.piece_at(from) == Some(Piece::new(PieceType::Knight, by)) {
                    return true;
                }
            }
        }

        for (df, dr) in KING_OFFSETS {
            if let Some(from) = sq.offset(df, dr) {
                if self.board.piece_at(from) == Some(Piece::new(PieceType::King, by)) {
                    return true;
                }
            }
        }

        for (dirs, straight) in [(ROOK_DIRS, true), (BISHOP_DIRS, false)] {
            for (df, dr) in dirs {
                let mut cur = sq;
                while let Some(next) = cur.offset(df, dr) {
                    cur = next;
                    match self.board.piece_at(cur) {
                        None => continue,
                        Some(p) => {
                            if p.color == by
                                && (p.kind == PieceType::Queen
                                    || (straight && p.kind == PieceType::Rook)
                                    || (!straight && p.kind == PieceType::Bishop))
                            {
                                return true;
                            }
                            break;
                        }
                    }
                }
            }
        }

        false
    }

    pub fn in_check(&self, color: Color) -> bool {
        match self.king_square(color) {
            Some(sq) => self.is_square_attacked(sq, color.opposite()),
            None => false,
        }
    }

    /// Применить ход. Ход обязан быть легальным для текущей позиции.
    pub fn do_move(&mut self, m: Move) {
        let us = self.side_to_move;
        let piece = self
            .board
            .piece_at(m.from)
            .expect("do_move: empty from-square");
        let captured = self.board.piece_at(m.to);

        if piece.kind == PieceType::Pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock = self.halfmove_clock.saturating_add(1);
        }

        let prev_ep = self.ep_square;
        self.ep_square = None;

        match m.kind {
            MoveType::Normal => {
                self.board.set(m.from, None);
                self.board.set(m.to, Some(piece));
                if piece.kind == PieceType::Pawn {
                    let from_rank = m.from.rank() as i8;
                    let to_rank = m.to.rank() as i8;
                    if (from_rank - to_rank).abs() == 2 {
                        let mid = ((from_rank + to_rank) / 2) as u8;
                        self.ep_square = Some(Square::new(m.from.file(), mid));
                    }
                }
            }
            MoveType::Promotion => {
                let promo = m.promotion.expect("promotion move without piece");
                self.board.set(m.from, None);
                self.board.set(m.to, Some(Piece::new(promo, us)));
            }
            MoveType::EnPassant => {
                debug_assert_eq!(prev_ep, Some(m.to));
                self.board.set(m.from, None);
                self.board.set(m.to, Some(piece));
                // Побитая пешка стоит на ранге исходной клетки.
                self.board
                    .set(Square::new(m.to.file(), m.from.rank()), None);
                self.halfmove_clock = 0;
            }
            MoveType::Castling => {
                let rank = m.from.rank();
                self.board.set(m.from, None);
                self.board.set(m.to, Some(piece));
                if m.to.file() == 6 {
                    // O-O: ладья h -> f
                    self.board.set(Square::new(7, rank), None);
                    self.board
                        .set(Square::new(5, rank), Some(Piece::new(PieceType::Rook, us)));
                } else {
                    // O-O-O: ладья a -> d
                    self.board.set(Square::new(0, rank), None);
                    self.board
                        .set(Square::new(3, rank), Some(Piece::new(PieceType::Rook, us)));
                }
            }
        }

        // Обновление прав рокировки.
        if piece.kind == PieceType::King {
            self.castling &= match us {
                Color::White => !(CASTLE_WHITE_KING | CASTLE_WHITE_QUEEN),
                Color::Black => !(CASTLE_BLACK_KING | CASTLE_BLACK_QUEEN),
            };
        }
        for sq in [m.from, m.to] {
            self.castling &= match sq.0 {
                0 => !CASTLE_WHITE_QUEEN,  // a1
                7 => !CASTLE_WHITE_KING,   // h1
                56 => !CASTLE_BLACK_QUEEN, // a8
                63 => !CASTLE_BLACK_KING,  // h8
                _ => 0xFF,
            };
        }

        if us == Color::Black {
            self.fullmove_number = self.fullmove_number.saturating_add(1);
        }
        self.side_to_move = us.opposite();
    }

    pub fn after_move(&self, m: Move) -> Position {
        let mut next = *self;
        next.do_move(m);
        next
    }

    /// Все легальные ходы текущей стороны в детерминированном порядке.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::with_capacity(48);
        self.pseudo_legal_moves(&mut moves);
        moves.retain(|&m| !self.after_move(m).in_check(self.side_to_move));
        moves
    }

    fn pseudo_legal_moves(&self, out: &mut Vec<Move>) {
        let us = self.side_to_move;
        for idx in 0..64u8 {
            let from = Square(idx);
            let piece = match self.board.piece_at(from) {
                Some(p) if p.color == us => p,
                _ => continue,
            };
            match piece.kind {
                PieceType::Pawn => self.pawn_moves(from, us, out),
                PieceType::Knight => self.leaper_moves(from, us, &KNIGHT_OFFSETS, out),
                PieceType::King => self.leaper_moves(from, us, &KING_OFFSETS, out),
                PieceType::Bishop => self.slider_moves(from, us, &BISHOP_DIRS, out),
                PieceType::Rook => self.slider_moves(from, us, &ROOK_DIRS, out),
                PieceType::Queen => {
                    self.slider_moves(from, us, &ROOK_DIRS, out);
                    self.slider_moves(from, us, &BISHOP_DIRS, out);
                }
            }
        }
        self.castling_moves(us, out);
    }

    fn pawn_moves(&self, from: Square, us: Color, out: &mut Vec<Move>) {
        let dr: i8 = match us {
            Color::White => 1,
            Color::Black => -1,
        };
        let start_rank = match us {
            Color::White => 1,
            Color::Black => 6,
        };
        let promo_rank = match us {
            Color::White => 7,
            Color::Black => 0,
        };

        let push_pawn = |to: Square, out: &mut Vec<Move>| {
            if to.rank() == promo_rank {
                for kind in PROMOTION_KINDS {
                    out.push(Move::promotion(from, to, kind));
                }
            } else {
                out.push(Move::normal(from, to));
            }
        };

        if let Some(one) = from.offset(0, dr) {
            if self.board.piece_at(one).is_none() {
                push_pawn(one, out);
                if from.rank() == start_rank {
                    if let Some(two) = from.offset(0, 2 * dr) {
                        if self.board.piece_at(two).is_none() {
                            out.push(Move::normal(from, two));
                        }
                    }
                }
            }
        }

        for df in [-1i8, 1] {
            if let Some(to) = from.offset(df, dr) {
                match self.board.piece_at(to) {
                    Some(p) if p.color != us => push_pawn(to, out),
                    None => {
                        if self.ep_square == Some(to) {
                            out.push(Move {
                                from,
                                to,
                                kind: MoveType::EnPassant,
                                promotion: None,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn leaper_moves(&self, from: Square, us: Color, offsets: &[(i8, i8)], out: &mut Vec<Move>) {
        for &(df, dr) in offsets {
            if let Some(to) = from.offset(df, dr) {
                match self.board.piece_at(to) {
                    Some(p) if p.color == us => {}
                    _ => out.push(Move::normal(from, to)),
                }
            }
        }
    }

    fn slider_moves(&self, from: Square, us: Color, dirs: &[(i8, i8)], out: &mut Vec<Move>) {
        for &(df, dr) in dirs {
            let mut cur = from;
            while let Some(to) = cur.offset(df, dr) {
                cur = to;
                match self.board.piece_at(to) {
                    None => out.push(Move::normal(from, to)),
                    Some(p) => {
                        if p.color != us {
                            out.push(Move::normal(from, to));
                        }
                        break;
                    }
                }
            }
        }
    }

    fn castling_moves(&self, us: Color, out: &mut Vec<Move>) {
        let (rank, king_right, queen_right) = match us {
            Color::White => (0u8, CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN),
            Color::Black => (7u8, CASTLE_BLACK_KING, CASTLE_BLACK_QUEEN),
        };
        let king_sq = Square::new(4, rank);
        if self.board.piece_at(king_sq) != Some(Piece::new(PieceType::King, us)) {
            return;
        }
        let them = us.opposite();

        if self.castling & king_right != 0
            && self.board.piece_at(Square::new(7, rank)) == Some(Piece::new(PieceType::Rook, us))
            && self.board.piece_at(Square::new(5, rank)).is_none()
            && self.board.piece_at(Square::new(6, rank)).is_none()
            && !self.is_square_attacked(king_sq, them)
            && !self.is_square_attacked(Square::new(5, rank), them)
            && !self.is_square_attacked(Square::new(6, rank), them)
        {
            out.push(Move {
                from: king_sq,
                to: Square::new(6, rank),
                kind: MoveType::Castling,
                promotion: None,
            });
        }

        if self.castling & queen_right != 0
            && self.board.piece_at(Square::new(0, rank)) == Some(Piece::new(PieceType::Rook, us))
            && self.board.piece_at(Square::new(1, rank)).is_none()
            && self.board.piece_at(Square::new(2, rank)).is_none()
            && self.board.piece_at(Square::new(3, rank)).is_none()
            && !self.is_square_attacked(king_sq, them)
            && !self.is_square_attacked(Square::new(3, rank), them)
            && !self.is_square_attacked(Square::new(2, rank), them)
        {
            out.push(Move {
                from: king_sq,
                to: Square::new(2, rank),
                kind: MoveType::Castling,
                promotion: None,
            });
        }
    }
}
