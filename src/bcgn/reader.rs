//! Потоковый BCGN-ридер с двойной буферизацией.
//!
//! Передний буфер потребляется, задний наполняется одним фоновым чтением.
//! Окно держит минимум два maxGameLength, поэтому после refill запись
//! всегда непрерывна в переднем представлении. Запись длиннее
//! maxGameLength или с испорченным заголовком — ошибка, валящая всю
//! итерацию (BCGN, в отличие от PGN, не переживает порчу файла).

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, ByteOrder};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread::JoinHandle;

use crate::chess::packed::{index_to_move, requires_long_move_index};
use crate::chess::{CompressedMove, CompressedPosition, Date, Eco, GameResult, Move, Position};
use crate::consts::{BCGN_FILE_HEADER_LEN, BCGN_MAX_GAME_LENGTH, BCGN_MIN_BUFFER_SIZE};

use super::{read_string, result_from_int, BcgnCompressionLevel, BcgnFileHeader, BcgnFlags};

// Минимальная длина записи: все обязательные поля фиксированной длины.
const MIN_RECORD_LEN: usize = 23;

type PendingRead = JoinHandle<(File, Vec<u8>, std::io::Result<usize>)>;

pub struct BcgnReader {
    header: BcgnFileHeader,
    window: Vec<u8>,
    len: usize,
    consumed: usize,
    chunk_size: usize,
    pending: Option<PendingRead>,
    eof: bool,
}

impl BcgnReader {
    pub fn open(path: &Path, buffer_bytes: usize) -> Result<BcgnReader> {
        let mut file = File::open(path)
            .with_context(|| format!("open bcgn {}", path.display()))?;

        let mut header_buf = [0u8; BCGN_FILE_HEADER_LEN];
        file.read_exact(&mut header_buf)
            .with_context(|| format!("read bcgn header {}", path.display()))?;
        let header = BcgnFileHeader::read_from(&header_buf)?;

        let capacity = buffer_bytes.max(BCGN_MIN_BUFFER_SIZE);
        let mut reader = BcgnReader {
            header,
            window: vec![0u8; capacity],
            len: 0,
            consumed: 0,
            chunk_size: capacity / 2,
            pending: None,
            eof: false,
        };

        // Первичное наполнение синхронно, дальше префетч в фоне.
        let mut file = file;
        while reader.len < reader.window.len() {
            let n = file.read(&mut reader.window[reader.len..])?;
            if n == 0 {
                reader.eof = true;
                break;
            }
            reader.len += n;
        }
        if !reader.eof {
            reader.spawn_prefetch(file, Vec::with_capacity(reader.chunk_size));
        }
        Ok(reader)
    }

    pub fn file_header(&self) -> &BcgnFileHeader {
        &self.header
    }

    /// Следующая запись; заимствует окно до следующего вызова.
    pub fn next_game(&mut self) -> Result<Option<UnparsedBcgnGame<'_>>> {
        if !self.ensure_available(2)? {
            return Ok(None);
        }
        let total_len =
            BigEndian::read_u16(&self.window[self.consumed..self.consumed + 2]) as usize;
        if total_len < MIN_RECORD_LEN {
            bail!("bcgn record too short: {} bytes", total_len);
        }
        if total_len > BCGN_MAX_GAME_LENGTH {
            bail!(
                "bcgn record of {} bytes exceeds maxGameLength {}",
                total_len,
                BCGN_MAX_GAME_LENGTH
            );
        }
        if !self.ensure_available(total_len)? {
            bail!("bcgn file truncated mid-record");
        }

        let at = self.consumed;
        self.consumed += total_len;
        let record = &self.window[at..at + total_len];
        UnparsedBcgnGame::parse(self.header, record).map(Some)
    }

    /// true, если доступно n байт; false — чистый EOF на границе записей.
    fn ensure_available(&mut self, n: usize) -> Result<bool> {
        while self.len - self.consumed < n {
            if self.eof && self.pending.is_none() {
                return Ok(self.len - self.consumed >= n);
            }
            self.refill()?;
        }
        Ok(true)
    }

    fn refill(&mut self) -> Result<()> {
        // Сдвиг непотреблённого хвоста к началу окна.
        self.window.copy_within(self.consumed..self.len, 0);
        self.len -= self.consumed;
        self.consumed = 0;

        if let Some(handle) = self.pending.take() {
            let (file, chunk, res) = handle
                .join()
                .map_err(|_| anyhow!("bcgn prefetch thread panicked"))?;
            let n = res.context("bcgn background read")?;
            if n == 0 {
                self.eof = true;
            } else {
                if self.len + n > self.window.len() {
                    bail!("bcgn refill overflow (window too small)");
                }
                self.window[self.len..self.len + n].copy_from_slice(&chunk[..n]);
                self.len += n;
                self.spawn_prefetch(file, chunk);
            }
        }
        Ok(())
    }

    fn spawn_prefetch(&mut self, mut file: File, mut chunk: Vec<u8>) {
        let chunk_size = self.chunk_size;
        self.pending = Some(std::thread::spawn(move || {
            chunk.clear();
            chunk.resize(chunk_size, 0);
            let mut filled = 0usize;
            let res = loop {
                match file.read(&mut chunk[filled..]) {
                    Ok(0) => break Ok(filled),
                    Ok(n) => {
                        filled += n;
                        if filled == chunk.len() {
                            break Ok(filled);
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            (file, chunk, res)
        }));
    }
}

impl Drop for BcgnReader {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            let _ = handle.join();
        }
    }
}

/// Запись партии без декодирования movetext.
pub struct UnparsedBcgnGame<'a> {
    header: BcgnFileHeader,
    ply_count: u16,
    result: Option<GameResult>,
    date: Date,
    white_elo: u16,
    black_elo: u16,
    round: u16,
    eco: Eco,
    flags: BcgnFlags,
    custom_start_pos: Option<CompressedPosition>,
    white: &'a str,
    black: &'a str,
    event: &'a str,
    site: &'a str,
    additional_tags: Vec<(&'a str, &'a str)>,
    movetext: &'a [u8],
}

impl<'a> UnparsedBcgnGame<'a> {
    fn parse(header: BcgnFileHeader, record: &'a [u8]) -> Result<UnparsedBcgnGame<'a>> {
        let total_len = BigEndian::read_u16(&record[0..2]) as usize;
        let header_len = BigEndian::read_u16(&record[2..4]) as usize;
        if header_len < MIN_RECORD_LEN || header_len > total_len {
            bail!(
                "bcgn record header length {} is inconsistent (total {})",
                header_len,
                total_len
            );
        }

        let ply_result = BigEndian::read_u16(&record[4..6]);
        let ply_count = ply_result >> 2;
        let result = result_from_int(ply_result & 0b11);

        let date = Date::new(
            BigEndian::read_u16(&record[6..8]),
            record[8],
            record[9],
        );
        let white_elo = BigEndian::read_u16(&record[10..12]);
        let black_elo = BigEndian::read_u16(&record[12..14]);
        let round = BigEndian::read_u16(&record[14..16]);
        let eco = Eco {
            category: record[16],
            index: record[17],
        };
        let flags = BcgnFlags::decode(record[18]);

        let mut at = 19usize;
        let custom_start_pos = if flags.has_custom_start_pos {
            if at + CompressedPosition::SIZE > header_len {
                bail!("bcgn record truncated in start position");
            }
            let bytes: [u8; 24] = record[at..at + CompressedPosition::SIZE]
                .try_into()
                .unwrap();
            at += CompressedPosition::SIZE;
            Some(CompressedPosition::from_bytes(bytes))
        } else {
            None
        };

        let mut read_str = |at: &mut usize| -> Result<&'a str> {
            let range = read_string(record, at)?;
            std::str::from_utf8(&record[range]).context("bcgn string is not UTF-8")
        };

        let white = read_str(&mut at)?;
        let black = read_str(&mut at)?;
        let event = read_str(&mut at)?;
        let site = read_str(&mut at)?;

        let mut additional_tags = Vec::new();
        if flags.has_additional_tags {
            let count = *record
                .get(at)
                .ok_or_else(|| anyhow!("bcgn record truncated in tag count"))?;
            at += 1;
            for _ in 0..count {
                let name = read_str(&mut at)?;
                let value = read_str(&mut at)?;
                additional_tags.push((name, value));
            }
        }

        if at != header_len {
            bail!(
                "bcgn record header is {} bytes, expected {}",
                at,
                header_len
            );
        }

        Ok(UnparsedBcgnGame {
            header,
            ply_count,
            result,
            date,
            white_elo,
            black_elo,
            round,
            eco,
            flags,
            custom_start_pos,
            white,
            black,
            event,
            site,
            additional_tags,
            movetext: &record[header_len..total_len],
        })
    }

    pub fn ply_count(&self) -> u16 {
        self.ply_count
    }

    pub fn result(&self) -> Option<GameResult> {
        self.result
    }

    pub fn date(&self) -> Date {
        self.date
    }

    pub fn white_elo(&self) -> u16 {
        self.white_elo
    }

    pub fn black_elo(&self) -> u16 {
        self.black_elo
    }

    pub fn round(&self) -> u16 {
        self.round
    }

    pub fn eco(&self) -> Eco {
        self.eco
    }

    pub fn flags(&self) -> BcgnFlags {
        self.flags
    }

    pub fn white(&self) -> &'a str {
        self.white
    }

    pub fn black(&self) -> &'a str {
        self.black
    }

    pub fn event(&self) -> &'a str {
        self.event
    }

    pub fn site(&self) -> &'a str {
        self.site
    }

    pub fn additional_tags(&self) -> &[(&'a str, &'a str)] {
        &self.additional_tags
    }

    pub fn start_position(&self) -> Result<Position> {
        match &self.custom_start_pos {
            Some(cp) => cp.decompress(),
            None => Ok(Position::start()),
        }
    }

    pub fn has_custom_start_pos(&self) -> bool {
        self.custom_start_pos.is_some()
    }

    /// Итератор позиций: старт, затем позиция после каждого хода.
    pub fn positions(&self) -> Result<BcgnPositionIter<'a>> {
        Ok(BcgnPositionIter {
            compression_level: self.header.compression_level,
            movetext: self.movetext,
            at: 0,
            pos: self.start_position()?,
            yielded_start: false,
        })
    }

    /// Декодировать весь movetext в список ходов.
    pub fn moves(&self) -> Result<Vec<Move>> {
        let mut iter = self.positions()?;
        let mut moves = Vec::with_capacity(self.ply_count as usize);
        while let Some((_pos, m)) = iter.next_position()? {
            if let Some(m) = m {
                moves.push(m);
            }
        }
        Ok(moves)
    }
}

pub struct BcgnPositionIter<'a> {
    compression_level: BcgnCompressionLevel,
    movetext: &'a [u8],
    at: usize,
    pos: Position,
    yielded_start: bool,
}

impl<'a> BcgnPositionIter<'a> {
    pub fn next_position(&mut self) -> Result<Option<(Position, Option<Move>)>> {
        if !self.yielded_start {
            self.yielded_start = true;
            return Ok(Some((self.pos, None)));
        }
        if self.at >= self.movetext.len() {
            return Ok(None);
        }

        let m = match self.compression_level {
            BcgnCompressionLevel::Level0 => {
                if self.at + 2 > self.movetext.len() {
                    bail!("bcgn movetext truncated");
                }
                let m = CompressedMove::read_from_big_endian(&self.movetext[self.at..])
                    .decompress();
                self.at += 2;
                if !self.pos.legal_moves().contains(&m) {
                    bail!("bcgn movetext contains an illegal move");
                }
                m
            }
            BcgnCompressionLevel::Level1 => {
                let index = if requires_long_move_index(&self.pos) {
                    if self.at + 2 > self.movetext.len() {
                        bail!("bcgn movetext truncated");
                    }
                    let v = BigEndian::read_u16(&self.movetext[self.at..]);
                    self.at += 2;
                    v
                } else {
                    let v = self.movetext[self.at] as u16;
                    self.at += 1;
                    v
                };
                index_to_move(&self.pos, index)?
            }
        };

        self.pos.do_move(m);
        Ok(Some((self.pos, Some(m))))
    }
}
