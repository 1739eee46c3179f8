//! Run — неизменяемый файл отсортированных записей внутри партиции.
//!
//! Имя файла — десятичный id, рядом лежит sidecar <id>_index. Файл
//! отображается в память и читается без блокировок: после установки run
//! никогда не мутирует. Результаты поиска несут id run'а, а не ссылку на
//! него: обратно к файлу ведёт партиция.

use anyhow::{anyhow, bail, Context, Result};
use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::consts::ENTRY_SIZE;

use super::entry::{CountAndGameOffset, Entry, Key, KeyOrder};
use super::index::RangeIndex;

pub struct RunFile {
    path: PathBuf,
    id: u32,
    mmap: Option<Mmap>,
    index: RangeIndex,
    entry_count: u64,
}

impl RunFile {
    /// Открыть run; sidecar читается с диска, при его отсутствии индекс
    /// перестраивается сканом.
    pub fn open(path: &Path, default_granularity: usize) -> Result<RunFile> {
        let id = Self::id_from_path(path)?;
        let file = File::open(path)
            .with_context(|| format!("open run {}", path.display()))?;
        let len = file.metadata()?.len();
        if len % ENTRY_SIZE as u64 != 0 {
            bail!(
                "run {} has invalid length {} (entry size {})",
                path.display(),
                len,
                ENTRY_SIZE
            );
        }
        let entry_count = len / ENTRY_SIZE as u64;

        let mmap = if len == 0 {
            None
        } else {
            // Safety: файл неизменяем после установки.
            Some(unsafe { Mmap::map(&file) }
                .with_context(|| format!("mmap run {}", path.display()))?)
        };

        let mut run = RunFile {
            path: path.to_path_buf(),
            id,
            mmap,
            index: RangeIndex::default(),
            entry_count,
        };

        run.index = match RangeIndex::read_sidecar(path) {
            Ok(index) => index,
            Err(_) => {
                log::warn!(
                    "run {} lacks a readable range index; rebuilding",
                    path.display()
                );
                run.rebuild_index(default_granularity)
            }
        };
        Ok(run)
    }

    /// Открыть только что записанный run с уже готовым индексом.
    pub fn open_with_index(path: &Path, index: RangeIndex) -> Result<RunFile> {
        let mut run = Self::open(path, 1024)?;
        run.index = index;
        Ok(run)
    }

    pub fn id_from_path(path: &Path) -> Result<u32> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("run file name is not a decimal id: {}", path.display()))
    }

    fn rebuild_index(&self, granularity: usize) -> RangeIndex {
        let mut sampler = RangeIndex::sampler(granularity);
        for i in 0..self.entry_count {
            sampler.observe(self.entry_at(i).key());
        }
        sampler.finish()
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    #[inline]
    pub fn index(&self) -> &RangeIndex {
        &self.index
    }

    #[inline]
    pub fn entry_at(&self, pos: u64) -> Entry {
        let mmap = self.mmap.as_ref().expect("entry_at on empty run");
        let at = pos as usize * ENTRY_SIZE;
        Entry::read_from(&mmap[at..at + ENTRY_SIZE])
    }

    /// Суммарный счётчик всех записей run'а.
    pub fn total_count(&self) -> u64 {
        (0..self.entry_count).map(|i| self.entry_at(i).count()).sum()
    }

    /// Точный диапазон [begin, end) ключа в порядке order; ширина 0 —
    /// ключа нет.
    pub fn equal_range(&self, key: &Key, order: KeyOrder) -> (u64, u64) {
        if self.entry_count == 0 {
            return (0, 0);
        }
        let (lo, hi) = self.index.search_bounds(key, order, self.entry_count);

        let begin = lo + partition_point_in(self, lo, hi, |k| {
            order.cmp(k, key) == Ordering::Less
        });
        let end = lo + partition_point_in(self, lo, hi, |k| {
            order.cmp(k, key) != Ordering::Greater
        });
        (begin, end.max(begin))
    }

    /// Накопить счётчик и смещение первой партии по диапазону ключа.
    pub fn accumulate(&self, key: &Key, order: KeyOrder, acc: &mut CountAndGameOffset) -> u64 {
        let (begin, end) = self.equal_range(key, order);
        for pos in begin..end {
            let entry = self.entry_at(pos);
            acc.combine(&entry.payload().unpack());
        }
        end - begin
    }
}

/// partition_point на срезе записей [lo, hi) по предикату от ключа.
fn partition_point_in<F>(run: &RunFile, lo: u64, hi: u64, pred: F) -> u64
where
    F: Fn(&Key) -> bool,
{
    let mut left = 0u64;
    let mut right = hi - lo;
    while left < right {
        let mid = (left + right) / 2;
        let entry = run.entry_at(lo + mid);
        if pred(entry.key()) {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    left
}

/// Записать отсортированные записи и sidecar; возвращает построенный индекс.
pub fn write_run(path: &Path, entries: &[Entry], granularity: usize) -> Result<RangeIndex> {
    use std::io::Write;

    let mut bytes = Vec::with_capacity(entries.len() * ENTRY_SIZE);
    let mut buf = [0u8; ENTRY_SIZE];
    for entry in entries {
        entry.write_to(&mut buf);
        bytes.extend_from_slice(&buf);
    }

    let mut file = File::create(path)
        .with_context(|| format!("create run {}", path.display()))?;
    file.write_all(&bytes)?;
    file.sync_data()?;

    let index = RangeIndex::build(entries, granularity);
    index.write_sidecar(path)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::PackedCountAndGameOffset;

    fn unique_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rookdb-run-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn entry(h: u32, count: u64, offset: u64) -> Entry {
        Entry::from_parts(
            Key::from_limbs([h, 0, 0, 0]),
            PackedCountAndGameOffset::pack(count, offset),
        )
    }

    #[test]
    fn write_open_query() {
        let dir = unique_dir();
        let path = dir.join("0");
        let entries = vec![
            entry(1, 10, 100),
            entry(1, 5, 50),
            entry(2, 3, 30),
            entry(7, 1, 10),
        ];
        let index = write_run(&path, &entries, 2).unwrap();
        let run = RunFile::open_with_index(&path, index).unwrap();

        assert_eq!(run.id(), 0);
        assert_eq!(run.entry_count(), 4);
        assert_eq!(run.total_count(), 19);

        let (b, e) = run.equal_range(&Key::from_limbs([1, 0, 0, 0]), KeyOrder::Full);
        assert_eq!((b, e), (0, 2));
        let (b, e) = run.equal_range(&Key::from_limbs([5, 0, 0, 0]), KeyOrder::Full);
        assert_eq!(b, e);

        let mut acc = CountAndGameOffset::default();
        let width = run.accumulate(&Key::from_limbs([1, 0, 0, 0]), KeyOrder::Full, &mut acc);
        assert_eq!(width, 2);
        assert_eq!(acc.count(), 15);
        assert_eq!(acc.game_offset(), 50);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reopen_reads_sidecar() {
        let dir = unique_dir();
        let path = dir.join("3");
        let entries: Vec<Entry> = (0..500).map(|i| entry(i, 1, i as u64)).collect();
        write_run(&path, &entries, 64).unwrap();

        let run = RunFile::open(&path, 1024).unwrap();
        assert_eq!(run.id(), 3);
        assert!(!run.index().is_empty());
        for probe in [0u32, 123, 499] {
            let (b, e) = run.equal_range(&Key::from_limbs([probe, 0, 0, 0]), KeyOrder::Full);
            assert_eq!((b, e), (probe as u64, probe as u64 + 1));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
