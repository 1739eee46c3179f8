//! Header store: метаданные партий per game level.
//!
//! Два append-only файла на уровень:
//!   <root>/header_<level> — байтовый лог записей переменной длины,
//!   <root>/index_<level>  — массив u64 LE смещений (game-index = позиция).
//!
//! Формат записи (LE):
//!   [u16 record_len][u16 ply_count (0xFFFF = неизвестен)]
//!   [u16 year][u8 month][u8 day][u8 eco_category][u8 eco_index]
//!   [u8 result][u8 pad]
//!   [u8 len + bytes: event][u8 len + bytes: white][u8 len + bytes: black]
//! Строки усечены до 255 байт.
//!
//! add_game атомарно (под мьютексом стора) дописывает байты, затем
//! до-append'ное число байт лога как новое смещение, и возвращает
//! (game_index, byte_offset). Запросы читают по смещению: длина
//! сериализована в самой записи.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::chess::{Date, Eco, GameLevel, GameResult};
use crate::consts::{HEADER_INDEX_PREFIX, HEADER_LOG_PREFIX, HEADER_MAX_STRING, UNKNOWN_PLY_COUNT};

// Фиксированная часть записи до строк.
const FIXED_PART: usize = 2 + 2 + 2 + 1 + 1 + 1 + 1 + 1 + 1;

/// Заголовок одной партии.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameHeader {
    pub ply_count: Option<u16>,
    pub date: Date,
    pub eco: Eco,
    pub result: GameResult,
    pub event: String,
    pub white: String,
    pub black: String,
}

impl GameHeader {
    pub fn serialize(&self) -> Vec<u8> {
        let event = truncated(&self.event);
        let white = truncated(&self.white);
        let black = truncated(&self.black);

        let record_len = FIXED_PART + 3 + event.len() + white.len() + black.len();
        let mut out = Vec::with_capacity(record_len);

        let mut u16buf = [0u8; 2];
        LittleEndian::write_u16(&mut u16buf, record_len as u16);
        out.extend_from_slice(&u16buf);
        LittleEndian::write_u16(&mut u16buf, self.ply_count.unwrap_or(UNKNOWN_PLY_COUNT));
        out.extend_from_slice(&u16buf);
        LittleEndian::write_u16(&mut u16buf, self.date.year);
        out.extend_from_slice(&u16buf);
        out.push(self.date.month);
        out.push(self.date.day);
        out.push(self.eco.category);
        out.push(self.eco.index);
        out.push(self.result.ordinal());
        out.push(0); // pad

        for s in [event, white, black] {
            out.push(s.len() as u8);
            out.extend_from_slice(s);
        }

        debug_assert_eq!(out.len(), record_len);
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<GameHeader> {
        if data.len() < FIXED_PART + 3 {
            bail!("game header record too short: {} bytes", data.len());
        }
        let record_len = LittleEndian::read_u16(&data[0..2]) as usize;
        if record_len > data.len() {
            bail!("game header record truncated");
        }

        let ply = LittleEndian::read_u16(&data[2..4]);
        let ply_count = if ply == UNKNOWN_PLY_COUNT {
            None
        } else {
            Some(ply)
        };
        let date = Date::new(LittleEndian::read_u16(&data[4..6]), data[6], data[7]);
        let eco = Eco {
            category: data[8],
            index: data[9],
        };
        let result_ord = data[10];
        if result_ord > 2 {
            bail!("game header has invalid result {}", result_ord);
        }
        let result = GameResult::from_ordinal(result_ord);

        let mut at = FIXED_PART;
        let mut read_str = |at: &mut usize| -> Result<String> {
            let len = *data
                .get(*at)
                .ok_or_else(|| anyhow!("game header truncated in string length"))?
                as usize;
            *at += 1;
            if *at + len > record_len {
                bail!("game header truncated in string body");
            }
            let s = String::from_utf8_lossy(&data[*at..*at + len]).into_owned();
            *at += len;
            Ok(s)
        };

        let event = read_str(&mut at)?;
        let white = read_str(&mut at)?;
        let black = read_str(&mut at)?;

        Ok(GameHeader {
            ply_count,
            date,
            eco,
            result,
            event,
            white,
            black,
        })
    }
}

fn truncated(s: &str) -> &[u8] {
    let mut len = s.len().min(HEADER_MAX_STRING);
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    &s.as_bytes()[..len]
}

struct StoreInner {
    log: File,
    index: File,
    log_len: u64,
    num_games: u32,
}

/// Append-only стор заголовков одного уровня.
pub struct HeaderStore {
    level: GameLevel,
    log_path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl HeaderStore {
    pub fn open(root: &Path, level: GameLevel) -> Result<HeaderStore> {
        let log_path = root.join(format!("{}{}", HEADER_LOG_PREFIX, level.as_str()));
        let index_path = root.join(format!("{}{}", HEADER_INDEX_PREFIX, level.as_str()));

        let log = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("open header log {}", log_path.display()))?;
        let index = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open header index {}", index_path.display()))?;

        let log_len = log.metadata()?.len();
        let index_len = index.metadata()?.len();
        if index_len % 8 != 0 {
            bail!(
                "header index {} has invalid length {}",
                index_path.display(),
                index_len
            );
        }

        Ok(HeaderStore {
            level,
            log_path,
            inner: Mutex::new(StoreInner {
                log,
                index,
                log_len,
                num_games: (index_len / 8) as u32,
            }),
        })
    }

    pub fn level(&self) -> GameLevel {
        self.level
    }

    /// Добавить партию; возвращает (game_index, байтовое смещение записи).
    pub fn add_game(&self, header: &GameHeader) -> Result<(u32, u64)> {
        let bytes = header.serialize();

        let mut inner = self.inner.lock().expect("header store mutex");
        let offset = inner.log_len;

        inner
            .log
            .write_all(&bytes)
            .with_context(|| format!("append header log {}", self.log_path.display()))?;

        let mut offset_buf = [0u8; 8];
        LittleEndian::write_u64(&mut offset_buf, offset);
        inner.index.write_all(&offset_buf)?;

        inner.log_len += bytes.len() as u64;
        let game_index = inner.num_games;
        inner.num_games += 1;
        Ok((game_index, offset))
    }

    pub fn num_games(&self) -> u32 {
        self.inner.lock().expect("header store mutex").num_games
    }

    /// Прочитать заголовки по упорядоченному набору смещений (в том же
    /// порядке).
    pub fn query_by_offsets(&self, offsets: &[u64]) -> Result<Vec<GameHeader>> {
        // Отдельный read-хэндл: append-хэндл не трогаем.
        let mut file = File::open(&self.log_path)
            .with_context(|| format!("open header log {}", self.log_path.display()))?;

        let mut headers = Vec::with_capacity(offsets.len());
        let mut len_buf = [0u8; 2];
        for &offset in offsets {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut len_buf)?;
            let record_len = LittleEndian::read_u16(&len_buf) as usize;
            let mut record = vec![0u8; record_len];
            record[..2].copy_from_slice(&len_buf);
            file.read_exact(&mut record[2..])?;
            headers.push(GameHeader::deserialize(&record)?);
        }
        Ok(headers)
    }

    /// Смещение записи по game-index (позиция в массиве оффсетов).
    pub fn offset_of(&self, game_index: u32) -> Result<u64> {
        let inner = self.inner.lock().expect("header store mutex");
        if game_index >= inner.num_games {
            bail!(
                "game index {} out of range 0..{}",
                game_index,
                inner.num_games
            );
        }
        drop(inner);

        let index_path = self
            .log_path
            .with_file_name(format!("{}{}", HEADER_INDEX_PREFIX, self.level.as_str()));
        let mut file = File::open(&index_path)?;
        file.seek(SeekFrom::Start(game_index as u64 * 8))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock().expect("header store mutex");
        inner.log.sync_data()?;
        inner.index.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_root(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rookdb-{}-{}-{}", prefix, pid, t))
    }

    fn sample(white: &str) -> GameHeader {
        GameHeader {
            ply_count: Some(42),
            date: Date::new(2001, 7, 15),
            eco: Eco::from_str("C65"),
            result: GameResult::WhiteWin,
            event: "Test Open".into(),
            white: white.into(),
            black: "Karpov".into(),
        }
    }

    #[test]
    fn record_roundtrip() {
        let h = sample("Kasparov");
        let bytes = h.serialize();
        let back = GameHeader::deserialize(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn strings_truncate_to_255() {
        let mut h = sample("x");
        h.white = "w".repeat(400);
        let back = GameHeader::deserialize(&h.serialize()).unwrap();
        assert_eq!(back.white.len(), 255);
    }

    #[test]
    fn store_appends_and_queries() {
        let root = unique_root("hdr");
        std::fs::create_dir_all(&root).unwrap();
        let store = HeaderStore::open(&root, GameLevel::Human).unwrap();

        let (i0, o0) = store.add_game(&sample("A")).unwrap();
        let (i1, o1) = store.add_game(&sample("B")).unwrap();
        assert_eq!((i0, i1), (0, 1));
        assert_eq!(o0, 0);
        assert!(o1 > o0);
        assert_eq!(store.num_games(), 2);

        let headers = store.query_by_offsets(&[o0, o1]).unwrap();
        assert_eq!(headers[0].white, "A");
        assert_eq!(headers[1].white, "B");

        assert_eq!(store.offset_of(1).unwrap(), o1);

        // Повторное открытие видит те же данные.
        drop(store);
        let store = HeaderStore::open(&root, GameLevel::Human).unwrap();
        assert_eq!(store.num_games(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }
}
