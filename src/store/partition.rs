//! Партиция — упорядоченный набор неизменяемых run'ов одного бакета
//! (level x result x hash-modulo).
//!
//! Id run'ов — монотонно растущие u32; порядок id и есть порядок
//! установки. nextId = max(установленные, будущие) + 1. Параллельный
//! импорт передаёт id явно (диапазоны зарезервированы по блокам) и сам
//! отвечает за отсутствие коллизий. Будущие run'ы (сортируются/пишутся
//! прямо сейчас) живут в ordered-наборе под мьютексом до
//! collect_future_files.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::entry::{CountAndGameOffset, Entry, Key, KeyOrder};
use super::index::RangeIndex;
use super::merge::{merge_runs, ProgressCallback};
use super::pipeline::StorePipeline;
use super::run::{write_run, RunFile};

struct FutureRun {
    path: PathBuf,
    promise: Receiver<Result<RangeIndex>>,
}

impl FutureRun {
    fn wait(self) -> Result<RunFile> {
        let index = self
            .promise
            .recv()
            .context("store pipeline dropped a run promise")??;
        RunFile::open_with_index(&self.path, index)
    }
}

pub struct Partition {
    path: PathBuf,
    granularity: usize,
    files: Vec<RunFile>,
    future: Mutex<BTreeMap<u32, FutureRun>>,
}

impl Partition {
    pub fn open(path: &Path, granularity: usize) -> Result<Partition> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create partition dir {}", path.display()))?;
        let mut partition = Partition {
            path: path.to_path_buf(),
            granularity,
            files: Vec::new(),
            future: Mutex::new(BTreeMap::new()),
        };
        partition.discover_files()?;
        Ok(partition)
    }

    /// Скан каталога: обычные файлы с десятичным именем без "index".
    fn discover_files(&mut self) -> Result<()> {
        self.files.clear();
        for dirent in std::fs::read_dir(&self.path)
            .with_context(|| format!("scan partition {}", self.path.display()))?
        {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if name.contains("index") {
                continue;
            }
            if name.parse::<u32>().is_err() {
                continue;
            }
            self.files
                .push(RunFile::open(&dirent.path(), self.granularity)?);
        }
        self.files.sort_by_key(|f| f.id());
        Ok(())
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_for_id(&self, id: u32) -> PathBuf {
        self.path.join(id.to_string())
    }

    /// Следующий свободный id: max(установленные, будущие) + 1, иначе 0.
    pub fn next_id(&self) -> u32 {
        let future = self.future.lock().expect("partition mutex");
        self.next_id_locked(&future)
    }

    fn next_id_locked(&self, future: &BTreeMap<u32, FutureRun>) -> u32 {
        let installed = self.files.last().map(|f| f.id());
        let pending = future.keys().next_back().copied();
        match (installed, pending) {
            (None, None) => 0,
            (a, b) => a.unwrap_or(0).max(b.unwrap_or(0)) + 1,
        }
    }

    pub fn num_runs(&self) -> usize {
        self.files.len()
    }

    pub fn run_ids(&self) -> Vec<u32> {
        self.files.iter().map(|f| f.id()).collect()
    }

    pub fn runs(&self) -> &[RunFile] {
        &self.files
    }

    pub fn total_count(&self) -> u64 {
        self.files.iter().map(|f| f.total_count()).sum()
    }

    /// Записать уже отсортированный массив записей напрямую (без пайплайна).
    pub fn store_ordered(&mut self, entries: &[Entry]) -> Result<()> {
        let id = self.next_id();
        let path = self.path_for_id(id);
        let index = write_run(&path, entries, self.granularity)?;
        self.files.push(RunFile::open_with_index(&path, index)?);
        Ok(())
    }

    /// Поставить несортированный буфер в пайплайн. Если id задан, файл с
    /// таким id не должен существовать — за это отвечает вызывающий
    /// (резервация диапазонов параллельного импорта).
    pub fn store_unordered(
        &self,
        pipeline: &StorePipeline,
        entries: Vec<Entry>,
        id: Option<u32>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut future = self.future.lock().expect("partition mutex");
        let id = id.unwrap_or_else(|| self.next_id_locked(&future));
        let path = self.path_for_id(id);
        let promise = pipeline.schedule_unordered(path.clone(), entries)?;
        if future.insert(id, FutureRun { path, promise }).is_some() {
            return Err(anyhow!("duplicate run id {} scheduled", id));
        }
        Ok(())
    }

    /// Дождаться всех будущих run'ов и установить их в порядке id.
    pub fn collect_future_files(&mut self) -> Result<()> {
        let drained: Vec<(u32, FutureRun)> = {
            let mut future = self.future.lock().expect("partition mutex");
            std::mem::take(&mut *future).into_iter().collect()
        };
        for (_id, fr) in drained {
            self.files.push(fr.wait()?);
        }
        self.files.sort_by_key(|f| f.id());
        Ok(())
    }

    /// Накопить счётчик/первую партию ключа по всем run'ам.
    pub fn accumulate(&self, key: &Key, order: KeyOrder, acc: &mut CountAndGameOffset) {
        for file in &self.files {
            file.accumulate(key, order, acc);
        }
    }

    /// Слить все run'ы в один новый с очередным id; входы удаляются.
    pub fn merge_all(&mut self, progress: Option<ProgressCallback<'_>>) -> Result<()> {
        debug_assert!(self.future.lock().expect("partition mutex").is_empty());
        if self.files.len() <= 1 {
            return Ok(());
        }

        let out_id = self.next_id();
        let out_path = self.path_for_id(out_id);
        let index = merge_runs(&self.files, &out_path, self.granularity, progress)?;

        let old: Vec<RunFile> = std::mem::take(&mut self.files);
        for file in &old {
            std::fs::remove_file(file.path())
                .with_context(|| format!("unlink merged run {}", file.path().display()))?;
            let sidecar = RangeIndex::sidecar_path(file.path());
            let _ = std::fs::remove_file(sidecar);
        }
        drop(old);

        self.files = vec![RunFile::open_with_index(&out_path, index)?];
        Ok(())
    }

    /// Тот же merge, но в отдельный каталог; текущая партиция не меняется.
    pub fn replicate_merge_all(
        &self,
        out_dir: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create replica dir {}", out_dir.display()))?;
        if self.files.is_empty() {
            return Ok(());
        }
        let out_path = out_dir.join("0");
        merge_runs(&self.files, &out_path, self.granularity, progress)?;
        Ok(())
    }

    /// Удалить все данные партиции.
    pub fn clear(&mut self) -> Result<()> {
        for file in std::mem::take(&mut self.files) {
            let _ = std::fs::remove_file(file.path());
            let _ = std::fs::remove_file(RangeIndex::sidecar_path(file.path()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::PackedCountAndGameOffset;

    fn unique_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rookdb-part-{}-{}",
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
    fn ids_are_monotonic_and_discovered() {
        let dir = unique_dir();
        {
            let mut p = Partition::open(&dir, 1024).unwrap();
            assert_eq!(p.next_id(), 0);
            p.store_ordered(&[entry(1, 1, 0)]).unwrap();
            p.store_ordered(&[entry(2, 1, 0)]).unwrap();
            assert_eq!(p.run_ids(), vec![0, 1]);
            assert_eq!(p.next_id(), 2);
        }
        // Повторное открытие: discovery по именам, индексы не мешают.
        let p = Partition::open(&dir, 1024).unwrap();
        assert_eq!(p.run_ids(), vec![0, 1]);
        assert_eq!(p.next_id(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn scheduled_ids_match_installed_order() {
        let dir = unique_dir();
        let mut p = Partition::open(&dir, 1024).unwrap();
        let pipeline = StorePipeline::new(4, 8, 2, 1024);

        // Принудительные id в «неправильном» порядке планирования.
        for &id in &[3u32, 1, 2, 0] {
            p.store_unordered(&pipeline, vec![entry(id, 1, id as u64)], Some(id))
                .unwrap();
        }
        assert_eq!(p.next_id(), 4);

        p.collect_future_files().unwrap();
        assert_eq!(p.run_ids(), vec![0, 1, 2, 3]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn merge_all_replaces_runs() {
        let dir = unique_dir();
        let mut p = Partition::open(&dir, 1024).unwrap();
        p.store_ordered(&[entry(1, 2, 10), entry(5, 1, 50)]).unwrap();
        p.store_ordered(&[entry(1, 3, 5), entry(9, 1, 90)]).unwrap();
        let before = p.total_count();

        p.merge_all(None).unwrap();
        assert_eq!(p.num_runs(), 1);
        assert_eq!(p.run_ids(), vec![2]);
        assert_eq!(p.total_count(), before);

        // Старые файлы удалены.
        assert!(!dir.join("0").exists());
        assert!(!dir.join("1").exists());

        let mut acc = CountAndGameOffset::default();
        p.accumulate(&Key::from_limbs([1, 0, 0, 0]), KeyOrder::Full, &mut acc);
        assert_eq!(acc.count(), 5);
        assert_eq!(acc.game_offset(), 5);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn replicate_merge_keeps_source() {
        let dir = unique_dir();
        let replica = dir.join("replica");
        let mut p = Partition::open(&dir.join("src"), 1024).unwrap();
        p.store_ordered(&[entry(1, 1, 0)]).unwrap();
        p.store_ordered(&[entry(2, 1, 0)]).unwrap();

        p.replicate_merge_all(&replica, None).unwrap();
        assert_eq!(p.num_runs(), 2);
        assert!(replica.join("0").exists());

        let merged = Partition::open(&replica, 1024).unwrap();
        assert_eq!(merged.num_runs(), 1);
        assert_eq!(merged.total_count(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
