//! db — фасад базы: каталог, manifest, header-сторы, партиции, статистика.
//!
//! Раскладка каталога:
//!   <root>/manifest, <root>/stats, <root>/LOCK
//!   <root>/<level>/<result>/<p>/<id>[, <id>_index]
//!   <root>/header_<level>, <root>/index_<level>
//!
//! Writer-операции (import/merge/clear) требуют эксклюзивного lock;
//! read-only открытие берёт shared. Статистика времени жизни лежит в
//! <root>/stats (JSON) и переписывается атомарно после каждого импорта.

pub mod import;
pub mod manifest;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chess::{GameLevel, GameResult};
use crate::config::RookConfig;
use crate::consts::{
    FORMAT_KEY, LEVEL_DIR_NAMES, NUM_HASH_PARTITIONS, RESULT_DIR_NAMES, STATS_FILE,
};
use crate::headers::HeaderStore;
use crate::lock::{acquire_exclusive_lock, acquire_shared_lock, LockGuard};
use crate::query;
use crate::store::merge::ProgressCallback;
use crate::store::Partition;

pub use manifest::ManifestValidationResult;

// ---------------- Importable files ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportableFileType {
    Pgn,
    Bcgn,
}

impl ImportableFileType {
    pub fn from_path(path: &Path) -> Result<ImportableFileType> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pgn") => Ok(ImportableFileType::Pgn),
            Some("bcgn") => Ok(ImportableFileType::Bcgn),
            other => Err(anyhow!(
                "cannot import '{}': unknown archive extension {:?}",
                path.display(),
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportableFile {
    pub path: PathBuf,
    pub level: GameLevel,
    pub file_type: ImportableFileType,
}

impl ImportableFile {
    pub fn new(path: PathBuf, level: GameLevel) -> Result<ImportableFile> {
        let file_type = ImportableFileType::from_path(&path)?;
        Ok(ImportableFile {
            path,
            level,
            file_type,
        })
    }
}

// ---------------- Stats ----------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SingleLevelImportStats {
    pub num_games: u64,
    pub num_skipped_games: u64,
    pub num_positions: u64,
}

impl SingleLevelImportStats {
    pub fn add(&mut self, rhs: &SingleLevelImportStats) {
        self.num_games += rhs.num_games;
        self.num_skipped_games += rhs.num_skipped_games;
        self.num_positions += rhs.num_positions;
    }
}

/// Статистика одного импорта, по уровням.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub levels: [SingleLevelImportStats; 3],
}

impl ImportStats {
    pub fn level(&self, level: GameLevel) -> &SingleLevelImportStats {
        &self.levels[level.ordinal() as usize]
    }

    pub fn level_mut(&mut self, level: GameLevel) -> &mut SingleLevelImportStats {
        &mut self.levels[level.ordinal() as usize]
    }

    pub fn add(&mut self, rhs: &ImportStats) {
        for (a, b) in self.levels.iter_mut().zip(rhs.levels.iter()) {
            a.add(b);
        }
    }

    pub fn total_games(&self) -> u64 {
        self.levels.iter().map(|l| l.num_games).sum()
    }

    pub fn total_skipped_games(&self) -> u64 {
        self.levels.iter().map(|l| l.num_skipped_games).sum()
    }

    pub fn total_positions(&self) -> u64 {
        self.levels.iter().map(|l| l.num_positions).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SingleLevelDatabaseStats {
    pub num_games: u64,
    pub num_positions: u64,
}

/// Статистика времени жизни БД; переживает перезапуски в <root>/stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub human: SingleLevelDatabaseStats,
    pub engine: SingleLevelDatabaseStats,
    pub server: SingleLevelDatabaseStats,
}

impl DatabaseStats {
    pub fn level_mut(&mut self, level: GameLevel) -> &mut SingleLevelDatabaseStats {
        match level {
            GameLevel::Human => &mut self.human,
            GameLevel::Engine => &mut self.engine,
            GameLevel::Server => &mut self.server,
        }
    }

    pub fn level(&self, level: GameLevel) -> &SingleLevelDatabaseStats {
        match level {
            GameLevel::Human => &self.human,
            GameLevel::Engine => &self.engine,
            GameLevel::Server => &self.server,
        }
    }

    pub fn absorb(&mut self, import: &ImportStats) {
        for level in GameLevel::VALUES {
            let s = self.level_mut(level);
            let i = import.level(level);
            s.num_games += i.num_games;
            s.num_positions += i.num_positions;
        }
    }
}

// ---------------- Format registry ----------------

type OpenFn = fn(&Path, RookConfig) -> Result<Database>;
type CreateFn = fn(&Path, RookConfig) -> Result<Database>;

/// Реестр форматов БД: имя -> конструкторы. Собирается на старте программы
/// и передаётся обработчикам команд; глобального состояния нет.
#[derive(Default)]
pub struct FormatRegistry {
    formats: Vec<(&'static str, OpenFn, CreateFn)>,
}

impl FormatRegistry {
    pub fn with_default_formats() -> FormatRegistry {
        let mut registry = FormatRegistry::default();
        registry.register(FORMAT_KEY, Database::open, Database::create);
        registry
    }

    pub fn register(&mut self, name: &'static str, open: OpenFn, create: CreateFn) {
        self.formats.push((name, open, create));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.formats.iter().map(|(n, _, _)| *n).collect()
    }

    pub fn open(&self, name: &str, path: &Path, cfg: RookConfig) -> Result<Database> {
        let (_, open, _) = self
            .formats
            .iter()
            .find(|(n, _, _)| *n == name)
            .ok_or_else(|| anyhow!("unknown database format '{}'", name))?;
        open(path, cfg)
    }

    pub fn create(&self, name: &str, path: &Path, cfg: RookConfig) -> Result<Database> {
        let (_, _, create) = self
            .formats
            .iter()
            .find(|(n, _, _)| *n == name)
            .ok_or_else(|| anyhow!("unknown database format '{}'", name))?;
        create(path, cfg)
    }
}

// ---------------- Database ----------------

pub struct Database {
    root: PathBuf,
    cfg: RookConfig,
    headers: Vec<HeaderStore>, // по ordinal уровня
    partitions: Vec<Partition>, // (level * 3 + result) * P + p
    stats: DatabaseStats,
    readonly: bool,
    _lock: LockGuard,
}

impl Database {
    /// Создать новую БД в пустом (или отсутствующем) каталоге.
    pub fn create(root: &Path, cfg: RookConfig) -> Result<Database> {
        if root.exists() && std::fs::read_dir(root)?.next().is_some() {
            bail!("directory {} is not empty", root.display());
        }
        std::fs::create_dir_all(root)
            .with_context(|| format!("create db root {}", root.display()))?;

        let lock = acquire_exclusive_lock(root)?;
        manifest::create_manifest(root, FORMAT_KEY)?;

        let mut db = Self::assemble(root, cfg, DatabaseStats::default(), false, lock)?;
        db.save_stats()?;
        Ok(db)
    }

    /// Открыть существующую БД в writer-режиме (эксклюзивный lock).
    pub fn open(root: &Path, cfg: RookConfig) -> Result<Database> {
        let lock = acquire_exclusive_lock(root)?;
        manifest::create_or_validate_manifest(root, FORMAT_KEY)?;
        let stats = Self::load_stats(root)?;
        Self::assemble(root, cfg, stats, false, lock)
    }

    /// Открыть для чтения (shared lock); import/merge/clear недоступны.
    pub fn open_read_only(root: &Path, cfg: RookConfig) -> Result<Database> {
        let lock = acquire_shared_lock(root)?;
        match manifest::validate_manifest(root, FORMAT_KEY)? {
            ManifestValidationResult::Ok => {}
            other => bail!("manifest validation failed: {:?}", other),
        }
        let stats = Self::load_stats(root)?;
        Self::assemble(root, cfg, stats, true, lock)
    }

    fn assemble(
        root: &Path,
        cfg: RookConfig,
        stats: DatabaseStats,
        readonly: bool,
        lock: LockGuard,
    ) -> Result<Database> {
        let cfg = cfg.clamp();

        let mut headers = Vec::with_capacity(3);
        for level in GameLevel::VALUES {
            headers.push(HeaderStore::open(root, level)?);
        }

        let mut partitions =
            Vec::with_capacity(3 * 3 * NUM_HASH_PARTITIONS as usize);
        for level in GameLevel::VALUES {
            for result in GameResult::VALUES {
                for p in 0..NUM_HASH_PARTITIONS {
                    let path = Self::partition_path(root, level, result, p);
                    partitions.push(Partition::open(&path, cfg.index_granularity)?);
                }
            }
        }

        Ok(Database {
            root: root.to_path_buf(),
            cfg,
            headers,
            partitions,
            stats,
            readonly,
            _lock: lock,
        })
    }

    fn partition_path(root: &Path, level: GameLevel, result: GameResult, p: u32) -> PathBuf {
        root.join(LEVEL_DIR_NAMES[level.ordinal() as usize])
            .join(RESULT_DIR_NAMES[result.ordinal() as usize])
            .join(p.to_string())
    }

    #[inline]
    fn partition_index(level: GameLevel, result: GameResult, p: u32) -> usize {
        ((level.ordinal() as usize * 3) + result.ordinal() as usize)
            * NUM_HASH_PARTITIONS as usize
            + p as usize
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RookConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &DatabaseStats {
        &self.stats
    }

    pub fn is_read_only(&self) -> bool {
        self.readonly
    }

    pub fn partition(&self, level: GameLevel, result: GameResult, p: u32) -> &Partition {
        &self.partitions[Self::partition_index(level, result, p)]
    }

    pub fn header_store(&self, level: GameLevel) -> &HeaderStore {
        &self.headers[level.ordinal() as usize]
    }

    fn assert_writable(&self, op: &str) -> Result<()> {
        if self.readonly {
            bail!("{}: database is open read-only", op);
        }
        Ok(())
    }

    // -------- import --------

    /// Импорт архивов. num_threads = 0 берёт значение из конфигурации
    /// (0 там означает hardware parallelism).
    pub fn import(
        &mut self,
        files: &[ImportableFile],
        num_threads: usize,
    ) -> Result<ImportStats> {
        self.assert_writable("import")?;

        let threads = match num_threads {
            0 => match self.cfg.import_threads {
                0 => std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
                n => n,
            },
            n => n,
        };

        let stats = import::import_files(self, files, threads)?;
        self.stats.absorb(&stats);
        self.save_stats()?;
        Ok(stats)
    }

    // -------- queries --------

    pub fn execute_query(&mut self, request: &query::Request) -> Result<serde_json::Value> {
        // Запросы после импорта обязаны видеть зафиксированное состояние.
        self.flush()?;
        query::execute(self, request)
    }

    // -------- merge --------

    pub fn merge_all(&mut self, mut progress: Option<ProgressCallback<'_>>) -> Result<()> {
        self.assert_writable("merge")?;
        for partition in self.partitions.iter_mut() {
            match progress.as_mut() {
                Some(cb) => partition.merge_all(Some(&mut **cb))?,
                None => partition.merge_all(None)?,
            }
        }
        Ok(())
    }

    /// Слить все партиции в новый каталог; текущая БД не меняется.
    /// Вместе с run'ами реплицируются manifest, header-сторы и stats.
    pub fn replicate_merge_all(
        &self,
        out_root: &Path,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        if out_root.exists() && std::fs::read_dir(out_root)?.next().is_some() {
            bail!("replica directory {} is not empty", out_root.display());
        }
        std::fs::create_dir_all(out_root)?;

        manifest::create_manifest(out_root, FORMAT_KEY)?;

        // Header-сторы копируются файлами: они append-only.
        for level in GameLevel::VALUES {
            for prefix in [
                crate::consts::HEADER_LOG_PREFIX,
                crate::consts::HEADER_INDEX_PREFIX,
            ] {
                let name = format!("{}{}", prefix, level.as_str());
                let src = self.root.join(&name);
                if src.exists() {
                    std::fs::copy(&src, out_root.join(&name))
                        .with_context(|| format!("replicate {}", src.display()))?;
                }
            }
        }

        for level in GameLevel::VALUES {
            for result in GameResult::VALUES {
                for p in 0..NUM_HASH_PARTITIONS {
                    let partition = self.partition(level, result, p);
                    let out_dir = Self::partition_path(out_root, level, result, p);
                    match progress.as_mut() {
                        Some(cb) => {
                            partition.replicate_merge_all(&out_dir, Some(&mut **cb))?
                        }
                        None => partition.replicate_merge_all(&out_dir, None)?,
                    }
                }
            }
        }

        let bytes = serde_json::to_vec_pretty(&self.stats)?;
        std::fs::write(out_root.join(STATS_FILE), bytes)?;
        Ok(())
    }

    // -------- maintenance --------

    /// Установить все будущие run'ы и сбросить header-сторы на диск.
    pub fn flush(&mut self) -> Result<()> {
        for partition in self.partitions.iter_mut() {
            partition.collect_future_files()?;
        }
        for store in &self.headers {
            store.flush()?;
        }
        Ok(())
    }

    /// Удалить данные всех партиций (manifest и header-сторы остаются).
    pub fn clear(&mut self) -> Result<()> {
        self.assert_writable("clear")?;
        for partition in self.partitions.iter_mut() {
            partition.clear()?;
        }
        self.stats = DatabaseStats::default();
        self.save_stats()
    }

    /// JSON-описание состояния БД для CLI status / socket dump.
    pub fn dump_info(&self) -> serde_json::Value {
        let mut partitions = Vec::new();
        for level in GameLevel::VALUES {
            for result in GameResult::VALUES {
                for p in 0..NUM_HASH_PARTITIONS {
                    let partition = self.partition(level, result, p);
                    partitions.push(serde_json::json!({
                        "level": level.as_str(),
                        "result": result.as_word(),
                        "partition": p,
                        "num_runs": partition.num_runs(),
                        "run_ids": partition.run_ids(),
                        "num_entries_total": partition.total_count(),
                    }));
                }
            }
        }
        serde_json::json!({
            "path": self.root.display().to_string(),
            "format": FORMAT_KEY,
            "stats": self.stats,
            "num_games": GameLevel::VALUES
                .iter()
                .map(|&l| self.header_store(l).num_games() as u64)
                .sum::<u64>(),
            "partitions": partitions,
        })
    }

    // -------- stats persistence --------

    fn stats_path(root: &Path) -> PathBuf {
        root.join(STATS_FILE)
    }

    fn load_stats(root: &Path) -> Result<DatabaseStats> {
        let path = Self::stats_path(root);
        if !path.exists() {
            return Ok(DatabaseStats::default());
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("read stats {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse stats {}", path.display()))
    }

    fn save_stats(&self) -> Result<()> {
        let path = Self::stats_path(&self.root);
        let tmp = self.root.join(format!("{}.tmp", STATS_FILE));
        let bytes = serde_json::to_vec_pretty(&self.stats)?;
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("rename stats into {}", path.display()))?;
        Ok(())
    }
}
