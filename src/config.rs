//! Centralized configuration and builder for RookDB.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - RookConfig::from_env() reads RDB_* variables; the value is then
//!   injected into Database constructors (no globals).
//!
//! Tunables:
//! - import_memory: суммарный бюджет entry-буферов импорта.
//! - import_threads: потоки импорта (0 = hardware_concurrency).
//! - index_granularity: entries на один сэмпл range-индекса.
//! - pgn_buffer_bytes: окно PGN-ридера (должно превышать самую длинную партию).
//! - bcgn_buffer_bytes: окно BCGN-ридера/райтера (минимум 2 x maxGameLength).

use std::fmt;

use crate::consts::BCGN_MIN_BUFFER_SIZE;

/// Top-level configuration for RookDB (import/query/merge).
#[derive(Clone, Debug)]
pub struct RookConfig {
    /// Total memory budget for import entry buffers, bytes.
    /// Env: RDB_IMPORT_MEMORY (default 256 MiB)
    pub import_memory: usize,

    /// Worker thread count for parallel import (0 = autodetect).
    /// Env: RDB_IMPORT_THREADS (default 0)
    pub import_threads: usize,

    /// Range index sampling granularity, entries per sample.
    /// Env: RDB_INDEX_GRANULARITY (default 1024)
    pub index_granularity: usize,

    /// PGN reader window, bytes. Must exceed the longest single game.
    /// Env: RDB_PGN_BUFFER_BYTES (default 4 MiB)
    pub pgn_buffer_bytes: usize,

    /// BCGN reader/writer buffer, bytes (clamped to >= 2 x maxGameLength).
    /// Env: RDB_BCGN_BUFFER_BYTES (default 256 KiB)
    pub bcgn_buffer_bytes: usize,
}

impl Default for RookConfig {
    fn default() -> Self {
        Self {
            import_memory: 256 * 1024 * 1024,
            import_threads: 0,
            index_granularity: 1024,
            pgn_buffer_bytes: 4 * 1024 * 1024,
            bcgn_buffer_bytes: 256 * 1024,
        }
    }
}

impl RookConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("RDB_IMPORT_MEMORY") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.import_memory = n;
            }
        }
        if let Ok(v) = std::env::var("RDB_IMPORT_THREADS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.import_threads = n;
            }
        }
        if let Ok(v) = std::env::var("RDB_INDEX_GRANULARITY") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.index_granularity = n;
                }
            }
        }
        if let Ok(v) = std::env::var("RDB_PGN_BUFFER_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.pgn_buffer_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("RDB_BCGN_BUFFER_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.bcgn_buffer_bytes = n;
            }
        }

        cfg.clamp()
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_import_memory(mut self, bytes: usize) -> Self {
        self.import_memory = bytes;
        self
    }

    pub fn with_import_threads(mut self, n: usize) -> Self {
        self.import_threads = n;
        self
    }

    pub fn with_index_granularity(mut self, n: usize) -> Self {
        self.index_granularity = n.max(1);
        self
    }

    pub fn with_pgn_buffer_bytes(mut self, bytes: usize) -> Self {
        self.pgn_buffer_bytes = bytes;
        self
    }

    pub fn with_bcgn_buffer_bytes(mut self, bytes: usize) -> Self {
        self.bcgn_buffer_bytes = bytes;
        self
    }

    /// Enforce format minimums.
    pub fn clamp(mut self) -> Self {
        self.index_granularity = self.index_granularity.max(1);
        self.bcgn_buffer_bytes = self.bcgn_buffer_bytes.max(BCGN_MIN_BUFFER_SIZE);
        self.pgn_buffer_bytes = self.pgn_buffer_bytes.max(64 * 1024);
        self
    }
}

impl fmt::Display for RookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RookConfig {{ import_memory: {}, import_threads: {}, index_granularity: {}, \
             pgn_buffer_bytes: {}, bcgn_buffer_bytes: {} }}",
            self.import_memory,
            self.import_threads,
            self.index_granularity,
            self.pgn_buffer_bytes,
            self.bcgn_buffer_bytes,
        )
    }
}

/// Lightweight builder that produces a RookConfig.
#[derive(Clone, Debug, Default)]
pub struct DbBuilder {
    cfg: Option<RookConfig>,
}

impl DbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from env to preserve current behavior, then allow overrides.
    pub fn from_env() -> Self {
        Self {
            cfg: Some(RookConfig::from_env()),
        }
    }

    pub fn import_memory(mut self, bytes: usize) -> Self {
        self.cfg = Some(self.take().with_import_memory(bytes));
        self
    }

    pub fn import_threads(mut self, n: usize) -> Self {
        self.cfg = Some(self.take().with_import_threads(n));
        self
    }

    pub fn index_granularity(mut self, n: usize) -> Self {
        self.cfg = Some(self.take().with_index_granularity(n));
        self
    }

    fn take(&mut self) -> RookConfig {
        self.cfg.take().unwrap_or_default()
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(mut self) -> RookConfig {
        self.take().clamp()
    }
}
