//! Entry — упакованная запись позиции фиксированного размера (24 байта LE).
//!
//! Сигнатура позиции: XXH3-128 от сырого 64-байтового placement c XOR
//! ordinal'а стороны хода в старший 32-битный лимб. Права рокировки и
//! en-passant в хэш сознательно не входят: запросы объединяют позиции,
//! различающиеся только этими флагами. Это свойство формата.
//!
//! Ключ (4 x u32, лимбы от старшего к младшему):
//!   limb0..limb2 — биты 127..32 сигнатуры;
//!   limb3 = [reverse_move:27][level:2][result:2][pad:1].
//! Reverse move живёт выше младших бит, поэтому записи с равным 96-битным
//! хэшем и разными reverse move сортируются соседями.
//!
//! Payload (один u64): 6 младших бит = N (1..=58) — ширина счётчика,
//! следующие N бит — счётчик, верхние 58-N бит — смещение первой партии.
//! Когда счётчику не хватает поля, N растёт и точность смещения
//! приносится в жертву; заполненное поле (все единицы) или нулевая ширина
//! означают «смещение потеряно».

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::chess::packed::PackedReverseMove;
use crate::chess::{GameLevel, GameResult, Move, Position};
use crate::consts::ENTRY_SIZE;

pub const INVALID_GAME_OFFSET: u64 = u64::MAX;

// ---------------- Signature ----------------

/// 128-битная сигнатура позиции как четыре лимба, старший первым.
pub fn position_signature(pos: &Position) -> [u32; 4] {
    let raw = pos.pieces_raw();
    let h = twox_hash::xxh3::hash128_with_seed(&raw, 0);
    let mut limbs = [
        (h >> 96) as u32,
        (h >> 64) as u32,
        (h >> 32) as u32,
        h as u32,
    ];
    limbs[0] ^= pos.side_to_move().ordinal() as u32;
    limbs
}

// ---------------- Key ----------------

const REVERSE_MOVE_SHIFT: u32 = 32 - PackedReverseMove::NUM_BITS; // 5
const LEVEL_SHIFT: u32 = REVERSE_MOVE_SHIFT - 2; // 3
const RESULT_SHIFT: u32 = LEVEL_SHIFT - 2; // 1
const REVERSE_MOVE_FIELD: u32 = PackedReverseMove::MASK << REVERSE_MOVE_SHIFT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    limbs: [u32; 4],
}

impl Key {
    pub fn new(
        pos: &Position,
        reverse_move: Option<Move>,
        level: GameLevel,
        result: GameResult,
    ) -> Key {
        let sig = position_signature(pos);
        let rm = PackedReverseMove::pack(reverse_move).packed();
        let limb3 = (rm << REVERSE_MOVE_SHIFT)
            | ((level.ordinal() as u32) << LEVEL_SHIFT)
            | ((result.ordinal() as u32) << RESULT_SHIFT);
        Key {
            limbs: [sig[0], sig[1], sig[2], limb3],
        }
    }

    pub fn from_limbs(limbs: [u32; 4]) -> Key {
        Key { limbs }
    }

    #[inline]
    pub fn limbs(&self) -> &[u32; 4] {
        &self.limbs
    }

    #[inline]
    pub fn level(&self) -> GameLevel {
        GameLevel::from_ordinal(((self.limbs[3] >> LEVEL_SHIFT) & 0b11) as u8)
    }

    #[inline]
    pub fn result(&self) -> GameResult {
        GameResult::from_ordinal(((self.limbs[3] >> RESULT_SHIFT) & 0b11) as u8)
    }

    #[inline]
    pub fn hash_mod(&self, d: u32) -> u32 {
        self.limbs[0] % d
    }

    /// Полный порядок: все четыре лимба (on-disk порядок партиции).
    #[inline]
    pub fn cmp_full(&self, rhs: &Key) -> Ordering {
        self.limbs.cmp(&rhs.limbs)
    }

    /// Порядок с reverse move: хэш, затем только поле reverse move.
    #[inline]
    pub fn cmp_with_reverse_move(&self, rhs: &Key) -> Ordering {
        self.limbs[..3]
            .cmp(&rhs.limbs[..3])
            .then_with(|| {
                (self.limbs[3] & REVERSE_MOVE_FIELD).cmp(&(rhs.limbs[3] & REVERSE_MOVE_FIELD))
            })
    }

    /// Порядок без reverse move: только 96-битный хэш.
    #[inline]
    pub fn cmp_without_reverse_move(&self, rhs: &Key) -> Ordering {
        self.limbs[..3].cmp(&rhs.limbs[..3])
    }
}

/// Компаратор ключей, выбираемый категорией запроса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Full,
    WithReverseMove,
    WithoutReverseMove,
}

impl KeyOrder {
    #[inline]
    pub fn cmp(self, lhs: &Key, rhs: &Key) -> Ordering {
        match self {
            KeyOrder::Full => lhs.cmp_full(rhs),
            KeyOrder::WithReverseMove => lhs.cmp_with_reverse_move(rhs),
            KeyOrder::WithoutReverseMove => lhs.cmp_without_reverse_move(rhs),
        }
    }
}

// ---------------- CountAndGameOffset (unpacked) ----------------

/// Распакованный payload: два 64-битных слова.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountAndGameOffset {
    count: u64,
    game_offset: u64,
}

impl Default for CountAndGameOffset {
    fn default() -> Self {
        Self {
            count: 0,
            game_offset: INVALID_GAME_OFFSET,
        }
    }
}

impl CountAndGameOffset {
    pub fn new(count: u64, game_offset: u64) -> Self {
        Self { count, game_offset }
    }

    pub fn single(game_offset: u64) -> Self {
        Self {
            count: 1,
            game_offset,
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn game_offset(&self) -> u64 {
        self.game_offset
    }

    #[inline]
    pub fn has_game_offset(&self) -> bool {
        self.game_offset != INVALID_GAME_OFFSET
    }

    /// Суммирует счётчики; смещение — минимум из валидных (первая партия).
    pub fn combine(&mut self, rhs: &CountAndGameOffset) {
        self.count = self.count.saturating_add(rhs.count);
        self.game_offset = self.game_offset.min(rhs.game_offset);
    }
}

// ---------------- PackedCountAndGameOffset ----------------

const SIZE_BITS: u64 = 6;
const DATA_BITS: u64 = 64 - SIZE_BITS; // 58
const SIZE_MASK: u64 = 0b11_1111;
const MAX_COUNT: u64 = (1u64 << DATA_BITS) - 1;

#[inline]
fn ones(bits: u64) -> u64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Упакованный payload: счётчик и смещение первой партии в одном слове.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedCountAndGameOffset {
    packed: u64,
}

impl PackedCountAndGameOffset {
    pub fn pack(count: u64, game_offset: u64) -> Self {
        let count = count.min(MAX_COUNT).max(1);
        // N — минимальная ширина счётчика, не меньше 1.
        let n = (64 - count.leading_zeros() as u64).max(1);
        debug_assert!(n <= DATA_BITS);

        let offset_bits = DATA_BITS - n;
        let mut packed = n | (count << SIZE_BITS);
        if offset_bits > 0 {
            let field_invalid = ones(offset_bits);
            let field = if game_offset >= field_invalid {
                field_invalid
            } else {
                game_offset
            };
            packed |= field << (SIZE_BITS + n);
        }
        Self { packed }
    }

    pub fn single(game_offset: u64) -> Self {
        Self::pack(1, game_offset)
    }

    pub fn from_raw(packed: u64) -> Self {
        Self { packed }
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.packed
    }

    #[inline]
    fn count_length(&self) -> u64 {
        self.packed & SIZE_MASK
    }

    #[inline]
    pub fn count(&self) -> u64 {
        let n = self.count_length();
        (self.packed >> SIZE_BITS) & ones(n)
    }

    /// Смещение первой партии; INVALID_GAME_OFFSET, если поле потеряно.
    #[inline]
    pub fn game_offset(&self) -> u64 {
        let n = self.count_length();
        let offset_bits = DATA_BITS - n;
        if offset_bits == 0 {
            return INVALID_GAME_OFFSET;
        }
        let field = self.packed >> (SIZE_BITS + n);
        if field == ones(offset_bits) {
            INVALID_GAME_OFFSET
        } else {
            field
        }
    }

    pub fn unpack(&self) -> CountAndGameOffset {
        CountAndGameOffset::new(self.count(), self.game_offset())
    }

    pub fn combine(&mut self, rhs: &PackedCountAndGameOffset) {
        let count = self.count().saturating_add(rhs.count()).min(MAX_COUNT);
        let offset = self.game_offset().min(rhs.game_offset());
        *self = Self::pack(count, offset);
    }
}

// ---------------- Entry ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    key: Key,
    payload: PackedCountAndGameOffset,
}

impl Entry {
    /// Одна встреча позиции в партии со смещением её заголовка.
    pub fn single(
        pos: &Position,
        reverse_move: Option<Move>,
        level: GameLevel,
        result: GameResult,
        game_offset: u64,
    ) -> Entry {
        Entry {
            key: Key::new(pos, reverse_move, level, result),
            payload: PackedCountAndGameOffset::single(game_offset),
        }
    }

    pub fn from_parts(key: Key, payload: PackedCountAndGameOffset) -> Entry {
        Entry { key, payload }
    }

    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[inline]
    pub fn payload(&self) -> &PackedCountAndGameOffset {
        &self.payload
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.payload.count()
    }

    #[inline]
    pub fn game_offset(&self) -> u64 {
        self.payload.game_offset()
    }

    pub fn combine(&mut self, rhs: &Entry) {
        debug_assert_eq!(self.key.cmp_full(&rhs.key), Ordering::Equal);
        self.payload.combine(&rhs.payload);
    }

    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= ENTRY_SIZE);
        for (i, limb) in self.key.limbs().iter().enumerate() {
            LittleEndian::write_u32(&mut out[i * 4..i * 4 + 4], *limb);
        }
        LittleEndian::write_u64(&mut out[16..24], self.payload.raw());
    }

    pub fn read_from(data: &[u8]) -> Entry {
        debug_assert!(data.len() >= ENTRY_SIZE);
        let limbs = [
            LittleEndian::read_u32(&data[0..4]),
            LittleEndian::read_u32(&data[4..8]),
            LittleEndian::read_u32(&data[8..12]),
            LittleEndian::read_u32(&data[12..16]),
        ];
        Entry {
            key: Key::from_limbs(limbs),
            payload: PackedCountAndGameOffset::from_raw(LittleEndian::read_u64(&data[16..24])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::san::parse_san;

    #[test]
    fn signature_distinguishes_side_to_move() {
        let white = Position::start();
        let mut black = white;
        black.set_side_to_move(crate::chess::Color::Black);
        assert_ne!(position_signature(&white), position_signature(&black));
    }

    #[test]
    fn key_orders_reverse_moves_adjacent() {
        let mut a = Position::start();
        let e4 = parse_san(&a, "e4").unwrap();
        a.do_move(e4);

        // Та же позиция с reverse move и без.
        let with_rm = Key::new(&a, Some(e4), GameLevel::Human, GameResult::WhiteWin);
        let without = Key::new(&a, None, GameLevel::Human, GameResult::WhiteWin);

        assert_eq!(with_rm.cmp_without_reverse_move(&without), Ordering::Equal);
        assert_ne!(with_rm.cmp_with_reverse_move(&without), Ordering::Equal);
        assert_eq!(with_rm.level(), GameLevel::Human);
        assert_eq!(with_rm.result(), GameResult::WhiteWin);
    }

    #[test]
    fn packed_payload_roundtrip() {
        for (count, offset) in [
            (1u64, 0u64),
            (1, 123_456),
            (7, 1 << 40),
            (1000, 42),
            ((1 << 20) - 1, (1 << 30) + 17),
        ] {
            let p = PackedCountAndGameOffset::pack(count, offset);
            assert_eq!(p.count(), count, "count for ({}, {})", count, offset);
            assert_eq!(p.game_offset(), offset, "offset for ({}, {})", count, offset);
        }
    }

    #[test]
    fn packed_payload_offset_lost_when_count_fills_word() {
        let p = PackedCountAndGameOffset::pack(MAX_COUNT, 5);
        assert_eq!(p.count(), MAX_COUNT);
        assert_eq!(p.game_offset(), INVALID_GAME_OFFSET);
    }

    #[test]
    fn packed_payload_offset_sacrificed_when_too_wide() {
        // 2 бита счётчика, 56 бит под offset; значение не помещается.
        let too_wide = 1u64 << 57;
        let p = PackedCountAndGameOffset::pack(2, too_wide);
        assert_eq!(p.count(), 2);
        assert_eq!(p.game_offset(), INVALID_GAME_OFFSET);
    }

    #[test]
    fn combine_keeps_first_game() {
        let mut a = PackedCountAndGameOffset::pack(3, 100);
        let b = PackedCountAndGameOffset::pack(5, 40);
        a.combine(&b);
        assert_eq!(a.count(), 8);
        assert_eq!(a.game_offset(), 40);
    }

    #[test]
    fn entry_disk_roundtrip() {
        let pos = Position::start();
        let e = Entry::single(&pos, None, GameLevel::Engine, GameResult::Draw, 777);
        let mut buf = [0u8; ENTRY_SIZE];
        e.write_to(&mut buf);
        let back = Entry::read_from(&buf);
        assert_eq!(back, e);
        assert_eq!(back.key().level(), GameLevel::Engine);
        assert_eq!(back.count(), 1);
        assert_eq!(back.game_offset(), 777);
    }
}
