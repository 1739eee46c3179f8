//! BCGN — компактная бинарная нотация партий.
//!
//! Формат файла:
//!   32-байтный заголовок: MAGIC "BCGN", u8 версия, u8 уровень сжатия
//!   (0 = пары байт CompressedMove; 1 = move-index относительно легальных
//!   ходов позиции, короткая u8 / длинная u16 BE кодировка по числу ходов),
//!   u8 aux-compression, нулевое дополнение. Любые другие значения невалидны.
//!
//! Запись партии (все многобайтовые целые — big-endian):
//!   [u16 total_len (вкл. оба length-слова)] [u16 header_len]
//!   [u16 ply<<2 | result]  (result: 0 нет, 1 белые, 2 чёрные, 3 ничья)
//!   [u16 year][u8 month][u8 day]
//!   [u16 white_elo][u16 black_elo][u16 round]
//!   [u8 eco_category][u8 eco_index]
//!   [u8 flags]  (бит 0: доп. теги; бит 1: нестандартная стартовая позиция)
//!   [24 байта CompressedPosition]?
//!   [4 строки с префиксом длины u8: white, black, event, site]
//!   [доп. теги: u8 count, затем count x {u8 len name, u8 len value}]?
//!   [movetext]

pub mod reader;
pub mod writer;

pub use reader::{BcgnReader, UnparsedBcgnGame};
pub use writer::{BcgnWriter, FileOpenMode};

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ByteOrder};

use crate::chess::{CompressedMove, CompressedPosition, Date, Eco, GameResult, Move, Position};
use crate::chess::packed::{move_to_index, requires_long_move_index};
use crate::consts::{BCGN_FILE_HEADER_LEN, BCGN_MAGIC};

pub const MAX_STRING_LENGTH: usize = 255;

// ---------------- File header ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcgnVersion {
    V0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcgnCompressionLevel {
    /// 16 бит на ход: CompressedMove BE.
    Level0,
    /// Индекс хода в списке легальных: u8 или u16 BE по числу ходов.
    Level1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcgnAuxCompression {
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcgnFileHeader {
    pub version: BcgnVersion,
    pub compression_level: BcgnCompressionLevel,
    pub aux_compression: BcgnAuxCompression,
}

impl Default for BcgnFileHeader {
    fn default() -> Self {
        Self {
            version: BcgnVersion::V0,
            compression_level: BcgnCompressionLevel::Level0,
            aux_compression: BcgnAuxCompression::None,
        }
    }
}

impl BcgnFileHeader {
    pub fn new(compression_level: BcgnCompressionLevel) -> Self {
        Self {
            compression_level,
            ..Default::default()
        }
    }

    pub fn write_to(&self, out: &mut [u8]) -> usize {
        out[..BCGN_FILE_HEADER_LEN].fill(0);
        out[..4].copy_from_slice(BCGN_MAGIC);
        out[4] = 0; // version
        out[5] = match self.compression_level {
            BcgnCompressionLevel::Level0 => 0,
            BcgnCompressionLevel::Level1 => 1,
        };
        out[6] = 0; // aux compression
        BCGN_FILE_HEADER_LEN
    }

    pub fn read_from(data: &[u8]) -> Result<BcgnFileHeader> {
        if data.len() < BCGN_FILE_HEADER_LEN {
            bail!("bcgn header truncated: {} bytes", data.len());
        }
        if &data[..4] != BCGN_MAGIC {
            bail!("bad bcgn magic");
        }
        if data[4] != 0 {
            bail!("unsupported bcgn version {}", data[4]);
        }
        let compression_level = match data[5] {
            0 => BcgnCompressionLevel::Level0,
            1 => BcgnCompressionLevel::Level1,
            other => bail!("unsupported bcgn compression level {}", other),
        };
        if data[6] != 0 {
            bail!("unsupported bcgn aux compression {}", data[6]);
        }
        if data[7..BCGN_FILE_HEADER_LEN].iter().any(|&b| b != 0) {
            bail!("bcgn header padding is not zero");
        }
        Ok(BcgnFileHeader {
            version: BcgnVersion::V0,
            compression_level,
            aux_compression: BcgnAuxCompression::None,
        })
    }
}

// ---------------- Flags ----------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BcgnFlags {
    pub has_additional_tags: bool,
    pub has_custom_start_pos: bool,
}

impl BcgnFlags {
    pub fn encode(self) -> u8 {
        ((self.has_custom_start_pos as u8) << 1) | (self.has_additional_tags as u8)
    }

    pub fn decode(v: u8) -> BcgnFlags {
        BcgnFlags {
            has_additional_tags: v & 1 != 0,
            has_custom_start_pos: (v >> 1) & 1 != 0,
        }
    }
}

// ---------------- Result mapping ----------------

pub(crate) fn result_to_int(result: Option<GameResult>) -> u16 {
    match result {
        None => 0,
        Some(GameResult::WhiteWin) => 1,
        Some(GameResult::BlackWin) => 2,
        Some(GameResult::Draw) => 3,
    }
}

pub(crate) fn result_from_int(v: u16) -> Option<GameResult> {
    match v {
        1 => Some(GameResult::WhiteWin),
        2 => Some(GameResult::BlackWin),
        3 => Some(GameResult::Draw),
        _ => None,
    }
}

// ---------------- Game entry buffer (writer side) ----------------

/// Буфер одной партии: сериализуется в запись целиком на endGame.
#[derive(Debug, Default)]
pub struct GameEntryBuffer {
    pub date: Date,
    pub white_elo: u16,
    pub black_elo: u16,
    pub round: u16,
    pub eco: Eco,
    pub custom_start_pos: Option<CompressedPosition>,
    pub result: Option<GameResult>,
    pub additional_tags: Vec<(String, String)>,
    pub white: String,
    pub black: String,
    pub event: String,
    pub site: String,
    pub num_plies: u16,
    movetext: Vec<u8>,
}

impl GameEntryBuffer {
    pub fn new() -> GameEntryBuffer {
        GameEntryBuffer {
            additional_tags: Vec::with_capacity(8),
            movetext: Vec::with_capacity(512),
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        self.date = Date::default();
        self.white_elo = 0;
        self.black_elo = 0;
        self.round = 0;
        self.eco = Eco::default();
        self.custom_start_pos = None;
        self.result = None;
        self.additional_tags.clear();
        self.white.clear();
        self.black.clear();
        self.event.clear();
        self.site.clear();
        self.num_plies = 0;
        self.movetext.clear();
    }

    pub fn set_additional_tag(&mut self, name: &str, value: &str) {
        if self.additional_tags.len() >= 255 {
            return;
        }
        self.additional_tags
            .push((name.to_string(), value.to_string()));
    }

    /// Закодировать ход согласно уровню сжатия заголовка файла.
    pub fn add_move(
        &mut self,
        header: &BcgnFileHeader,
        pos: &Position,
        m: Move,
    ) -> Result<()> {
        match header.compression_level {
            BcgnCompressionLevel::Level0 => {
                let mut buf = [0u8; 2];
                CompressedMove::compress(m).write_to_big_endian(&mut buf);
                self.movetext.extend_from_slice(&buf);
            }
            BcgnCompressionLevel::Level1 => {
                let index = move_to_index(pos, m)?;
                if requires_long_move_index(pos) {
                    self.movetext.push((index >> 8) as u8);
                    self.movetext.push((index & 0xFF) as u8);
                } else {
                    self.movetext.push(index as u8);
                }
            }
        }
        self.num_plies += 1;
        Ok(())
    }

    fn header_length(&self) -> usize {
        // Обязательные поля фиксированной длины: длины (4), ply+result (2),
        // дата (4), эло/раунд/ECO (8), флаги (1), 4 байта длин строк.
        let mut length = 2 + 2 + 2 + 4 + 2 + 2 + 2 + 2 + 1 + 4;
        if self.custom_start_pos.is_some() {
            length += CompressedPosition::SIZE;
        }
        length += truncated_len(&self.white);
        length += truncated_len(&self.black);
        length += truncated_len(&self.event);
        length += truncated_len(&self.site);
        if !self.additional_tags.is_empty() {
            length += 1;
            for (name, value) in &self.additional_tags {
                length += 2;
                length += truncated_len(name);
                length += truncated_len(value);
            }
        }
        length
    }

    /// Сериализовать запись; возвращает число записанных байт.
    /// Запись длиннее 65535 байт отвергается.
    pub fn write_to(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let header_length = self.header_length();
        let total_length = header_length + self.movetext.len();
        if total_length > u16::MAX as usize {
            return Err(anyhow!(
                "bcgn game record is {} bytes; must not exceed 65535",
                total_length
            ));
        }

        let flags = BcgnFlags {
            has_additional_tags: !self.additional_tags.is_empty(),
            has_custom_start_pos: self.custom_start_pos.is_some(),
        };

        let start = out.len();
        let mut u16buf = [0u8; 2];
        let mut push_u16 = |out: &mut Vec<u8>, v: u16| {
            BigEndian::write_u16(&mut u16buf, v);
            out.extend_from_slice(&u16buf);
        };

        push_u16(out, total_length as u16);
        push_u16(out, header_length as u16);
        push_u16(out, ((self.num_plies & 0x3FFF) << 2) | result_to_int(self.result));
        push_u16(out, self.date.year);
        out.push(self.date.month);
        out.push(self.date.day);
        push_u16(out, self.white_elo);
        push_u16(out, self.black_elo);
        push_u16(out, self.round);
        out.push(self.eco.category);
        out.push(self.eco.index);
        out.push(flags.encode());

        if let Some(cp) = &self.custom_start_pos {
            out.extend_from_slice(cp.as_bytes());
        }

        for s in [&self.white, &self.black, &self.event, &self.site] {
            write_string(out, s);
        }

        if !self.additional_tags.is_empty() {
            out.push(self.additional_tags.len() as u8);
            for (name, value) in &self.additional_tags {
                write_string(out, name);
                write_string(out, value);
            }
        }

        out.extend_from_slice(&self.movetext);

        let written = out.len() - start;
        debug_assert_eq!(written, total_length);
        Ok(written)
    }
}

/// Усечение до 255 байт по границе символа.
fn truncated_len(s: &str) -> usize {
    let mut len = s.len().min(MAX_STRING_LENGTH);
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    len
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let len = truncated_len(s);
    out.push(len as u8);
    out.extend_from_slice(&s.as_bytes()[..len]);
}

pub(crate) fn read_string(data: &[u8], at: &mut usize) -> Result<std::ops::Range<usize>> {
    let len = *data
        .get(*at)
        .ok_or_else(|| anyhow!("bcgn record truncated in string length"))? as usize;
    *at += 1;
    if *at + len > data.len() {
        bail!("bcgn record truncated in string body");
    }
    let range = *at..*at + len;
    *at += len;
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_roundtrip() {
        for level in [BcgnCompressionLevel::Level0, BcgnCompressionLevel::Level1] {
            let mut buf = [0u8; BCGN_FILE_HEADER_LEN];
            BcgnFileHeader::new(level).write_to(&mut buf);
            let back = BcgnFileHeader::read_from(&buf).unwrap();
            assert_eq!(back.compression_level, level);
        }
    }

    #[test]
    fn file_header_rejects_garbage() {
        let mut buf = [0u8; BCGN_FILE_HEADER_LEN];
        BcgnFileHeader::default().write_to(&mut buf);

        let mut bad_magic = buf;
        bad_magic[0] = b'X';
        assert!(BcgnFileHeader::read_from(&bad_magic).is_err());

        let mut bad_level = buf;
        bad_level[5] = 9;
        assert!(BcgnFileHeader::read_from(&bad_level).is_err());

        let mut bad_pad = buf;
        bad_pad[20] = 1;
        assert!(BcgnFileHeader::read_from(&bad_pad).is_err());
    }

    #[test]
    fn string_truncation_is_exact() {
        let mut out = Vec::new();
        let long = "x".repeat(300);
        write_string(&mut out, &long);
        assert_eq!(out[0], 255);
        assert_eq!(out.len(), 256);
    }

    #[test]
    fn oversize_record_rejected() {
        let mut game = GameEntryBuffer::new();
        game.movetext = vec![0u8; 70_000];
        let mut out = Vec::new();
        assert!(game.write_to(&mut out).is_err());
    }
}
