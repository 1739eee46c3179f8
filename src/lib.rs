#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod consts;
pub mod lock;
pub mod metrics;

// Шахматная граница (внешний для ядра rules kernel)
pub mod chess; // src/chess/{mod,position,san,packed}.rs

// Кодеки архивов партий
pub mod bcgn; // src/bcgn/{mod,reader,writer}.rs
pub mod pgn; // src/pgn/mod.rs

// Персистентность
pub mod headers; // src/headers/mod.rs
pub mod store; // src/store/{entry,index,run,partition,pipeline,merge}.rs

// Запросы и фасад
pub mod db; // src/db/{mod,manifest,import}.rs
pub mod query; // src/query/mod.rs

// TCP-обёртка над движком запросов
pub mod server; // src/server/mod.rs

// Удобные реэкспорты
pub use config::RookConfig;
pub use db::{Database, DatabaseStats, ImportStats, ImportableFile};
pub use lock::{acquire_exclusive_lock, acquire_shared_lock, LockGuard};
