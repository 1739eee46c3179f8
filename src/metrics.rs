//! Lightweight global metrics for RookDB.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Import (games / skipped / positions)
//! - Store pipeline (buffers sorted, runs written)
//! - Merge (runs merged, entries written)
//! - Query (requests, keys searched)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Import -----
static IMPORT_GAMES: AtomicU64 = AtomicU64::new(0);
static IMPORT_SKIPPED_GAMES: AtomicU64 = AtomicU64::new(0);
static IMPORT_POSITIONS: AtomicU64 = AtomicU64::new(0);

// ----- Store pipeline -----
static PIPELINE_BUFFERS_SORTED: AtomicU64 = AtomicU64::new(0);
static PIPELINE_RUNS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static PIPELINE_ENTRIES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Merge -----
static MERGE_RUNS_MERGED: AtomicU64 = AtomicU64::new(0);
static MERGE_ENTRIES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Query -----
static QUERY_REQUESTS: AtomicU64 = AtomicU64::new(0);
static QUERY_KEYS_SEARCHED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub import_games: u64,
    pub import_skipped_games: u64,
    pub import_positions: u64,

    pub pipeline_buffers_sorted: u64,
    pub pipeline_runs_written: u64,
    pub pipeline_entries_written: u64,

    pub merge_runs_merged: u64,
    pub merge_entries_written: u64,

    pub query_requests: u64,
    pub query_keys_searched: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        import_games: IMPORT_GAMES.load(Ordering::Relaxed),
        import_skipped_games: IMPORT_SKIPPED_GAMES.load(Ordering::Relaxed),
        import_positions: IMPORT_POSITIONS.load(Ordering::Relaxed),
        pipeline_buffers_sorted: PIPELINE_BUFFERS_SORTED.load(Ordering::Relaxed),
        pipeline_runs_written: PIPELINE_RUNS_WRITTEN.load(Ordering::Relaxed),
        pipeline_entries_written: PIPELINE_ENTRIES_WRITTEN.load(Ordering::Relaxed),
        merge_runs_merged: MERGE_RUNS_MERGED.load(Ordering::Relaxed),
        merge_entries_written: MERGE_ENTRIES_WRITTEN.load(Ordering::Relaxed),
        query_requests: QUERY_REQUESTS.load(Ordering::Relaxed),
        query_keys_searched: QUERY_KEYS_SEARCHED.load(Ordering::Relaxed),
    }
}

#[inline]
pub(crate) fn add_import_games(n: u64) {
    IMPORT_GAMES.fetch_add(n, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add_import_skipped_games(n: u64) {
    IMPORT_SKIPPED_GAMES.fetch_add(n, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add_import_positions(n: u64) {
    IMPORT_POSITIONS.fetch_add(n, Ordering::Relaxed);
}

#[inline]
pub(crate) fn inc_buffers_sorted() {
    PIPELINE_BUFFERS_SORTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn inc_runs_written(entries: u64) {
    PIPELINE_RUNS_WRITTEN.fetch_add(1, Ordering::Relaxed);
    PIPELINE_ENTRIES_WRITTEN.fetch_add(entries, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add_merge(runs: u64, entries: u64) {
    MERGE_RUNS_MERGED.fetch_add(runs, Ordering::Relaxed);
    MERGE_ENTRIES_WRITTEN.fetch_add(entries, Ordering::Relaxed);
}

#[inline]
pub(crate) fn inc_query_requests() {
    QUERY_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add_query_keys(n: u64) {
    QUERY_KEYS_SEARCHED.fetch_add(n, Ordering::Relaxed);
}
