//! Хранилище позиций: упакованные записи, отсортированные run'ы с
//! разреженным range-индексом, асинхронный пайплайн записи и внешний
//! k-way merge.

pub mod entry;
pub mod index;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod run;

pub use entry::{
    position_signature, CountAndGameOffset, Entry, Key, KeyOrder, PackedCountAndGameOffset,
    INVALID_GAME_OFFSET,
};
pub use index::RangeIndex;
pub use merge::{merge_runs, MergeProgress};
pub use partition::Partition;
pub use pipeline::StorePipeline;
pub use run::RunFile;
