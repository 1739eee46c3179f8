//! Шахматная граница: типы, позиция, SAN, упакованные представления.
//!
//! Ядро БД обращается к этому модулю только через небольшой набор операций:
//! стартовая позиция / FEN, применение хода, перечисление легальных ходов,
//! разбор и печать SAN, сырой 64-байтовый placement для сигнатуры,
//! компактные кодировки (позиция 24 байта, ход 2 байта, reverse move 27 бит).
//!
//! Перечисления держим маленькими и табличными: явные ordinal/from_ordinal
//! и массивы VALUES с фиксированной кардинальностью (2, 3, 6, 64).

pub mod packed;
pub mod position;
pub mod san;

pub use packed::{CompressedMove, CompressedPosition, PackedReverseMove};
pub use position::{Board, Position};

use anyhow::{anyhow, Result};

// ---------------- Color ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub const VALUES: [Color; 2] = [Color::White, Color::Black];

    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> Color {
        Self::VALUES[id as usize]
    }

    #[inline]
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

// ---------------- PieceType / Piece ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    pub const VALUES: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> PieceType {
        Self::VALUES[id as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceType,
    pub color: Color,
}

impl Piece {
    #[inline]
    pub fn new(kind: PieceType, color: Color) -> Piece {
        Piece { kind, color }
    }

    /// Ordinal layout: wp=0 bp=1 wn=2 bn=3 ... wk=10 bk=11.
    #[inline]
    pub fn ordinal(self) -> u8 {
        self.kind.ordinal() * 2 + self.color.ordinal()
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> Piece {
        Piece {
            kind: PieceType::from_ordinal(id / 2),
            color: Color::from_ordinal(id & 1),
        }
    }

    pub fn to_char(self) -> char {
        let c = match self.kind {
            PieceType::Pawn => 'p',
            PieceType::Knight => 'n',
            PieceType::Bishop => 'b',
            PieceType::Rook => 'r',
            PieceType::Queen => 'q',
            PieceType::King => 'k',
        };
        match self.color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    pub fn from_char(c: char) -> Option<Piece> {
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        let kind = match c.to_ascii_lowercase() {
            'p' => PieceType::Pawn,
            'n' => PieceType::Knight,
            'b' => PieceType::Bishop,
            'r' => PieceType::Rook,
            'q' => PieceType::Queen,
            'k' => PieceType::King,
            _ => return None,
        };
        Some(Piece { kind, color })
    }
}

/// Код пустой клетки в сыром 64-байтовом placement (после 12 кодов фигур).
pub const EMPTY_SQUARE: u8 = 12;

// ---------------- Square ----------------

/// Клетка 0..63, a1=0, b1=1, ..., h8=63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(pub u8);

impl Square {
    pub const COUNT: u8 = 64;

    #[inline]
    pub fn new(file: u8, rank: u8) -> Square {
        debug_assert!(file < 8 && rank < 8);
        Square(rank * 8 + file)
    }

    #[inline]
    pub fn file(self) -> u8 {
        self.0 % 8
    }

    #[inline]
    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Смещение в координатах (file, rank); None при выходе за доску.
    #[inline]
    pub fn offset(self, df: i8, dr: i8) -> Option<Square> {
        let f = self.file() as i8 + df;
        let r = self.rank() as i8 + dr;
        if (0..8).contains(&f) && (0..8).contains(&r) {
            Some(Square::new(f as u8, r as u8))
        } else {
            None
        }
    }

    pub fn name(self) -> String {
        format!(
            "{}{}",
            (b'a' + self.file()) as char,
            (b'1' + self.rank()) as char
        )
    }

    pub fn from_name(s: &str) -> Result<Square> {
        let b = s.as_bytes();
        if b.len() != 2 || !(b'a'..=b'h').contains(&b[0]) || !(b'1'..=b'8').contains(&b[1]) {
            return Err(anyhow!("invalid square '{}'", s));
        }
        Ok(Square::new(b[0] - b'a', b[1] - b'1'))
    }
}

// ---------------- Move ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveType {
    Normal,
    Promotion,
    Castling,
    EnPassant,
}

impl MoveType {
    pub const VALUES: [MoveType; 4] = [
        MoveType::Normal,
        MoveType::Promotion,
        MoveType::Castling,
        MoveType::EnPassant,
    ];

    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> MoveType {
        Self::VALUES[id as usize]
    }
}

/// Ход. Рокировка кодируется как ход короля e1->g1 / e1->c1 (и для чёрных).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub kind: MoveType,
    pub promotion: Option<PieceType>,
}

impl Move {
    #[inline]
    pub fn normal(from: Square, to: Square) -> Move {
        Move {
            from,
            to,
            kind: MoveType::Normal,
            promotion: None,
        }
    }

    #[inline]
    pub fn promotion(from: Square, to: Square, promo: PieceType) -> Move {
        Move {
            from,
            to,
            kind: MoveType::Promotion,
            promotion: Some(promo),
        }
    }
}

// ---------------- GameResult / GameLevel ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameResult {
    pub const VALUES: [GameResult; 3] =
        [GameResult::WhiteWin, GameResult::BlackWin, GameResult::Draw];

    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> GameResult {
        Self::VALUES[id as usize]
    }

    /// Словесная форма, используемая в JSON запросов/ответов.
    pub fn as_word(self) -> &'static str {
        match self {
            GameResult::WhiteWin => "win",
            GameResult::BlackWin => "loss",
            GameResult::Draw => "draw",
        }
    }

    pub fn from_word(s: &str) -> Result<GameResult> {
        match s {
            "win" => Ok(GameResult::WhiteWin),
            "loss" => Ok(GameResult::BlackWin),
            "draw" => Ok(GameResult::Draw),
            other => Err(anyhow!("invalid game result '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameLevel {
    Human,
    Engine,
    Server,
}

impl GameLevel {
    pub const VALUES: [GameLevel; 3] = [GameLevel::Human, GameLevel::Engine, GameLevel::Server];

    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn from_ordinal(id: u8) -> GameLevel {
        Self::VALUES[id as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameLevel::Human => "human",
            GameLevel::Engine => "engine",
            GameLevel::Server => "server",
        }
    }

    pub fn from_str(s: &str) -> Result<GameLevel> {
        match s {
            "human" => Ok(GameLevel::Human),
            "engine" => Ok(GameLevel::Engine),
            "server" => Ok(GameLevel::Server),
            other => Err(anyhow!("invalid game level '{}'", other)),
        }
    }
}

// ---------------- Date ----------------

/// Дата партии; 0 в любом поле = неизвестно (PGN "????.??.??").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day: u8) -> Date {
        Date { year, month, day }
    }

    /// PGN-форма "1992.08.31"; сегменты из '?' дают 0.
    pub fn from_pgn(s: &str) -> Date {
        let mut parts = s.split('.');
        let year = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(0);
        let month = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .unwrap_or(0);
        let day = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .unwrap_or(0);
        Date { year, month, day }
    }

    pub fn to_pgn(self) -> String {
        let y = if self.year == 0 {
            "????".to_string()
        } else {
            format!("{:04}", self.year)
        };
        let m = if self.month == 0 {
            "??".to_string()
        } else {
            format!("{:02}", self.month)
        };
        let d = if self.day == 0 {
            "??".to_string()
        } else {
            format!("{:02}", self.day)
        };
        format!("{}.{}.{}", y, m, d)
    }
}

// ---------------- Eco ----------------

/// Классификация дебюта: категория 'A'..'E' + индекс 0..99.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eco {
    pub category: u8,
    pub index: u8,
}

impl Eco {
    pub fn from_str(s: &str) -> Eco {
        let b = s.as_bytes();
        if b.len() >= 3 && (b'A'..=b'E').contains(&b[0]) {
            if let Ok(idx) = s[1..3].parse::<u8>() {
                return Eco {
                    category: b[0] - b'A',
                    index: idx,
                };
            }
        }
        Eco::default()
    }

    pub fn to_string(self) -> String {
        format!("{}{:02}", (b'A' + self.category) as char, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_ordinal_roundtrip() {
        for id in 0..12u8 {
            assert_eq!(Piece::from_ordinal(id).ordinal(), id);
        }
    }

    #[test]
    fn square_names() {
        assert_eq!(Square::from_name("a1").unwrap().0, 0);
        assert_eq!(Square::from_name("h8").unwrap().0, 63);
        assert_eq!(Square::from_name("e4").unwrap().name(), "e4");
        assert!(Square::from_name("i9").is_err());
    }

    #[test]
    fn date_parse() {
        let d = Date::from_pgn("1992.08.31");
        assert_eq!((d.year, d.month, d.day), (1992, 8, 31));
        let u = Date::from_pgn("????.??.??");
        assert_eq!((u.year, u.month, u.day), (0, 0, 0));
        assert_eq!(u.to_pgn(), "????.??.??");
    }

    #[test]
    fn eco_parse() {
        let e = Eco::from_str("C65");
        assert_eq!(e.to_string(), "C65");
        assert_eq!(Eco::from_str("??").to_string(), "A00");
    }
}
