//! Общие константы форматов (manifest, runs, range index, header store, BCGN, TCP).

// -------- Manifest --------
pub const MANIFEST_MAGIC: &[u8; 8] = b"RKDBMAN1";
pub const MANIFEST_FILE: &str = "manifest";
// Маркер endianness: записывается как u32 LE. Прочитанное значение,
// отличное от ENDIAN_MARKER, означает БД с другого порядка байт.
pub const ENDIAN_MARKER: u32 = 0x1122_3344;
// Ключ формата этой реализации (persisted в manifest).
pub const FORMAT_KEY: &str = "rookdb_local";

pub const STATS_FILE: &str = "stats";
pub const LOCK_FILE: &str = "LOCK";

// -------- Partitions / runs --------
// Каталоги партиций: <root>/<level>/<result>/<p>/<id>[, <id>_index]
pub const LEVEL_DIR_NAMES: [&str; 3] = ["human", "engine", "server"];
pub const RESULT_DIR_NAMES: [&str; 3] = ["w", "l", "d"];
// Количество партиций по hash modulo (формат фиксирует P = 1).
pub const NUM_HASH_PARTITIONS: u32 = 1;

pub const INDEX_SUFFIX: &str = "_index";

// Формат entry (LE):
// [limb0 u32][limb1 u32][limb2 u32][limb3 u32][payload u64]
// limb0..limb2 — старшие 96 бит сигнатуры позиции,
// limb3 = [reverse_move:27][level:2][result:2][pad:1].
pub const ENTRY_SIZE: usize = 24;

// Формат сэмпла range-индекса (LE): [key 16 байт][entry_pos u64]
pub const INDEX_SAMPLE_SIZE: usize = 24;

// -------- Header store --------
pub const HEADER_LOG_PREFIX: &str = "header_";
pub const HEADER_INDEX_PREFIX: &str = "index_";
// Ply count, неизвестный на момент записи заголовка.
pub const UNKNOWN_PLY_COUNT: u16 = u16::MAX;
// Строки в заголовке усечены до одного байта длины.
pub const HEADER_MAX_STRING: usize = 255;

// -------- BCGN --------
pub const BCGN_MAGIC: &[u8; 4] = b"BCGN";
pub const BCGN_FILE_HEADER_LEN: usize = 32;
// Запись партии не может превышать maxGameLength; буфер чтения держит
// минимум два таких отрезка, чтобы запись всегда была непрерывна во
// front-буфере после refill.
pub const BCGN_MAX_GAME_LENGTH: usize = 64 * 1024;
pub const BCGN_MIN_BUFFER_SIZE: usize = 2 * BCGN_MAX_GAME_LENGTH;

// -------- PGN --------
// Разделитель регионов: два последовательных "\n\n" (теги, затем ходы).
pub const PGN_REGION_END: &[u8; 2] = b"\n\n";

// -------- Ingest --------
// Нижняя оценка байт PGN на один ход; используется при резервации id
// блоков параллельного импорта.
pub const MIN_PGN_BYTES_PER_MOVE: u64 = 4;

// -------- TCP framing --------
// Каждое сообщение предваряется 8 байтами: u32 LE длина S и S ^ FRAME_XOR
// для верификации; расхождение закрывает соединение.
pub const FRAME_XOR: u32 = 3_173_045_653;
pub const FRAME_MAX_LEN: u32 = 16 * 1024 * 1024;
