//! Ingest driver: архивы (PGN/BCGN) -> записи позиций в партициях.
//!
//! Входные файлы группируются по уровню. Последовательная политика
//! (<= 2 потоков) читает файлы друг за другом; параллельная делит файлы
//! уровня на блоки примерно равного байтового размера и резервирует
//! каждому блоку диапазон id в каждой партиции назначения:
//!   ceil(block_bytes / (buffer_capacity * MIN_PGN_BYTES_PER_MOVE)) + 1
//! id на партицию. Внутри блока id строго растут, между блоками диапазоны
//! не пересекаются, поэтому id остаются упорядоченными по входу.
//!
//! Ошибки: битый PGN-архив логируется, файл пропускается, воркер
//! продолжает; битый BCGN или партия больше окна ридера — фатально для
//! блока (уже записанные run'ы не откатываются).

use anyhow::{Context, Result};
use std::path::Path;

use crate::bcgn::BcgnReader;
use crate::chess::{GameLevel, GameResult};
use crate::consts::{MIN_PGN_BYTES_PER_MOVE, NUM_HASH_PARTITIONS, UNKNOWN_PLY_COUNT};
use crate::headers::GameHeader;
use crate::metrics;
use crate::pgn::LazyPgnReader;
use crate::store::{Entry, StorePipeline};

use super::{Database, ImportStats, ImportableFile, ImportableFileType, SingleLevelImportStats};

const P: usize = NUM_HASH_PARTITIONS as usize;
// Бакеты воркера: (result, hash-partition).
const BUCKETS: usize = 3 * P;

pub(crate) fn import_files(
    db: &mut Database,
    files: &[ImportableFile],
    num_threads: usize,
) -> Result<ImportStats> {
    let mut total = ImportStats::default();
    if files.is_empty() {
        return Ok(total);
    }

    // Группировка входов по уровню.
    let mut by_level: [Vec<ImportableFile>; 3] = Default::default();
    for file in files {
        by_level[file.level.ordinal() as usize].push(file.clone());
    }

    let num_workers = if num_threads <= 2 {
        1
    } else {
        num_threads - num_threads / 2
    };
    let num_sort_threads = if num_threads <= 2 {
        1
    } else {
        num_threads / 2
    };

    // Половина бюджета уходит в циркулирующие буферы, вторая — запас пула,
    // чтобы воркеры не ждали писателя.
    let num_buffers = BUCKETS * num_workers;
    let total_buffers = num_buffers * 2;
    let buffer_capacity = (db.cfg.import_memory
        / total_buffers.max(1)
        / crate::consts::ENTRY_SIZE)
        .max(1024);

    let pipeline = StorePipeline::new(
        total_buffers,
        buffer_capacity,
        num_sort_threads,
        db.cfg.index_granularity,
    );

    for level in GameLevel::VALUES {
        let paths = &by_level[level.ordinal() as usize];
        if paths.is_empty() {
            continue;
        }

        let level_stats = if num_workers == 1 {
            import_block(db, &pipeline, paths, level, None, buffer_capacity)?
        } else {
            import_level_parallel(db, &pipeline, paths, level, buffer_capacity, num_workers)?
        };
        total.level_mut(level).add(&level_stats);
    }

    drop(pipeline); // ждёт сортировщиков и писателя
    for partition in db.partitions.iter_mut() {
        partition.collect_future_files()?;
    }

    metrics::add_import_games(total.total_games());
    metrics::add_import_skipped_games(total.total_skipped_games());
    metrics::add_import_positions(total.total_positions());
    Ok(total)
}

// ---------------- Parallel policy ----------------

struct Block {
    files: Vec<ImportableFile>,
    // Следующий свободный id на бакет (result * P + p).
    next_ids: Vec<u32>,
}

fn import_level_parallel(
    db: &mut Database,
    pipeline: &StorePipeline,
    paths: &[ImportableFile],
    level: GameLevel,
    buffer_capacity: usize,
    num_workers: usize,
) -> Result<SingleLevelImportStats> {
    let blocks = divide_into_blocks(db, paths, level, buffer_capacity, num_workers)?;

    let db_ref: &Database = db;
    let mut stats = SingleLevelImportStats::default();

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        let mut blocks = blocks.into_iter();

        // Первый блок выполняется в текущем потоке, остальные — в своих.
        let first = blocks.next();
        for block in blocks {
            if block.files.is_empty() {
                continue;
            }
            handles.push(scope.spawn(move || {
                import_block(
                    db_ref,
                    pipeline,
                    &block.files,
                    level,
                    Some(block.next_ids),
                    buffer_capacity,
                )
            }));
        }

        if let Some(block) = first {
            if !block.files.is_empty() {
                match import_block(
                    db_ref,
                    pipeline,
                    &block.files,
                    level,
                    Some(block.next_ids),
                    buffer_capacity,
                ) {
                    Ok(s) => stats.add(&s),
                    Err(e) => log::error!("import worker failed: {:#}", e),
                }
            }
        }

        for handle in handles {
            match handle.join() {
                Ok(Ok(s)) => stats.add(&s),
                Ok(Err(e)) => log::error!("import worker failed: {:#}", e),
                Err(_) => log::error!("import worker panicked"),
            }
        }
    });

    Ok(stats)
}

/// Поделить файлы уровня на num_blocks блоков примерно равного размера и
/// зарезервировать диапазоны id каждому блоку в каждой партиции.
fn divide_into_blocks(
    db: &Database,
    paths: &[ImportableFile],
    level: GameLevel,
    buffer_capacity: usize,
    num_blocks: usize,
) -> Result<Vec<Block>> {
    let mut sizes = Vec::with_capacity(paths.len());
    let mut total_size = 0u64;
    for file in paths {
        let size = std::fs::metadata(&file.path)
            .with_context(|| format!("stat {}", file.path.display()))?
            .len();
        total_size += size;
        sizes.push(size);
    }
    let threshold = total_size.div_ceil(num_blocks as u64).max(1);

    // Распределение игр по бакетам неизвестно заранее: резервируем так,
    // будто все позиции блока уйдут в одну партицию.
    let mut base_ids = vec![0u32; BUCKETS];
    for (slot, id) in base_ids.iter_mut().enumerate() {
        let result = GameResult::from_ordinal((slot / P) as u8);
        let p = (slot % P) as u32;
        *id = db.partition(level, result, p).next_id();
    }

    let mut blocks = Vec::with_capacity(num_blocks);
    let mut id_offset = 0u32;
    let mut block_files = Vec::new();
    let mut block_size = 0u64;

    let mut push_block =
        |files: Vec<ImportableFile>, size: u64, id_offset: &mut u32, blocks: &mut Vec<Block>| {
            let next_ids = base_ids.iter().map(|b| b + *id_offset).collect();
            blocks.push(Block { files, next_ids });
            let reserved = (size / (buffer_capacity as u64 * MIN_PGN_BYTES_PER_MOVE)) as u32 + 1;
            *id_offset += reserved;
        };

    for (file, size) in paths.iter().zip(sizes) {
        block_files.push(file.clone());
        block_size += size;
        if block_size >= threshold {
            push_block(
                std::mem::take(&mut block_files),
                block_size,
                &mut id_offset,
                &mut blocks,
            );
            block_size = 0;
        }
    }
    if !block_files.is_empty() {
        push_block(block_files, block_size, &mut id_offset, &mut blocks);
    }

    Ok(blocks)
}

// ---------------- Worker ----------------

/// Обработка одного блока: буфер на бакет, partition bucket по
/// hash mod P, сабмит полного буфера на очередной id.
fn import_block(
    db: &Database,
    pipeline: &StorePipeline,
    files: &[ImportableFile],
    level: GameLevel,
    forced_ids: Option<Vec<u32>>,
    buffer_capacity: usize,
) -> Result<SingleLevelImportStats> {
    let mut buffers: Vec<Vec<Entry>> = Vec::with_capacity(BUCKETS);
    for _ in 0..BUCKETS {
        buffers.push(pipeline.get_empty_buffer()?);
    }
    let mut next_ids = forced_ids;
    let mut stats = SingleLevelImportStats::default();

    for file in files {
        let outcome = match file.file_type {
            ImportableFileType::Pgn => import_pgn_file(
                db,
                pipeline,
                &file.path,
                level,
                &mut buffers,
                &mut next_ids,
                &mut stats,
                buffer_capacity,
            ),
            ImportableFileType::Bcgn => import_bcgn_file(
                db,
                pipeline,
                &file.path,
                level,
                &mut buffers,
                &mut next_ids,
                &mut stats,
                buffer_capacity,
            ),
        };
        if let Err(e) = outcome {
            match file.file_type {
                // Битый PGN: лог + следующий файл.
                ImportableFileType::Pgn => {
                    log::warn!("skipping pgn {}: {:#}", file.path.display(), e)
                }
                // BCGN-итерация валит весь блок.
                ImportableFileType::Bcgn => return Err(e),
            }
        }
    }

    // Флаш непустых буферов; сами буферы возвращаются в пул писателем.
    for (slot, buffer) in buffers.into_iter().enumerate() {
        if buffer.is_empty() {
            continue;
        }
        submit_buffer(db, pipeline, level, slot, buffer, &mut next_ids)?;
    }

    Ok(stats)
}

fn submit_buffer(
    db: &Database,
    pipeline: &StorePipeline,
    level: GameLevel,
    slot: usize,
    buffer: Vec<Entry>,
    next_ids: &mut Option<Vec<u32>>,
) -> Result<()> {
    let result = GameResult::from_ordinal((slot / P) as u8);
    let p = (slot % P) as u32;
    let id = next_ids.as_mut().map(|ids| {
        let id = ids[slot];
        ids[slot] += 1;
        id
    });
    db.partition(level, result, p)
        .store_unordered(pipeline, buffer, id)
}

#[allow(clippy::too_many_arguments)]
fn import_pgn_file(
    db: &Database,
    pipeline: &StorePipeline,
    path: &Path,
    level: GameLevel,
    buffers: &mut [Vec<Entry>],
    next_ids: &mut Option<Vec<u32>>,
    stats: &mut SingleLevelImportStats,
    buffer_capacity: usize,
) -> Result<()> {
    let mut reader = LazyPgnReader::open(path, db.cfg.pgn_buffer_bytes)?;

    while let Some(game) = reader.next_game()? {
        let result = match game.result().to_game_result() {
            Some(r) => r,
            None => {
                stats.num_skipped_games += 1;
                continue;
            }
        };

        // Заголовок пишется до перечисления позиций: ply берётся из тега,
        // потому что позиции могут перечисляться параллельно с другими
        // партиями того же стора.
        let header = GameHeader {
            ply_count: match game.ply_count(UNKNOWN_PLY_COUNT) {
                UNKNOWN_PLY_COUNT => None,
                n => Some(n),
            },
            date: game.date(),
            eco: game.eco(),
            result,
            event: game.event().to_string(),
            white: game.white().to_string(),
            black: game.black().to_string(),
        };
        let (_game_index, game_offset) = db.header_store(level).add_game(&header)?;

        let mut positions = match game.positions() {
            Ok(iter) => iter,
            Err(e) => {
                // Негодный FEN-тег: партия уже в header-сторе, но позиций
                // не даст.
                log::warn!("{}: {:#}", path.display(), e);
                stats.num_games += 1;
                continue;
            }
        };

        let mut num_positions = 0u64;
        loop {
            match positions.next_position() {
                Ok(Some((pos, reverse_move))) => {
                    num_positions += 1;
                    let entry =
                        Entry::single(&pos, reverse_move, level, result, game_offset);
                    let slot = result.ordinal() as usize * P
                        + entry.key().hash_mod(NUM_HASH_PARTITIONS) as usize;
                    buffers[slot].push(entry);

                    if buffers[slot].len() >= buffer_capacity {
                        let full =
                            std::mem::replace(&mut buffers[slot], pipeline.get_empty_buffer()?);
                        submit_buffer(db, pipeline, level, slot, full, next_ids)?;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // SAN не применился: обрываем партию, файл продолжаем.
                    log::warn!("{}: {:#}", path.display(), e);
                    break;
                }
            }
        }

        stats.num_games += 1;
        stats.num_positions += num_positions;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn import_bcgn_file(
    db: &Database,
    pipeline: &StorePipeline,
    path: &Path,
    level: GameLevel,
    buffers: &mut [Vec<Entry>],
    next_ids: &mut Option<Vec<u32>>,
    stats: &mut SingleLevelImportStats,
    buffer_capacity: usize,
) -> Result<()> {
    let mut reader = BcgnReader::open(path, db.cfg.bcgn_buffer_bytes)?;

    while let Some(game) = reader.next_game()? {
        let result = match game.result() {
            Some(r) => r,
            None => {
                stats.num_skipped_games += 1;
                continue;
            }
        };

        let header = GameHeader {
            ply_count: Some(game.ply_count()),
            date: game.date(),
            eco: game.eco(),
            result,
            event: game.event().to_string(),
            white: game.white().to_string(),
            black: game.black().to_string(),
        };
        let (_game_index, game_offset) = db.header_store(level).add_game(&header)?;

        let mut positions = game.positions()?;
        let mut num_positions = 0u64;
        while let Some((pos, reverse_move)) = positions.next_position()? {
            num_positions += 1;
            let entry = Entry::single(&pos, reverse_move, level, result, game_offset);
            let slot = result.ordinal() as usize * P
                + entry.key().hash_mod(NUM_HASH_PARTITIONS) as usize;
            buffers[slot].push(entry);

            if buffers[slot].len() >= buffer_capacity {
                let full = std::mem::replace(&mut buffers[slot], pipeline.get_empty_buffer()?);
                submit_buffer(db, pipeline, level, slot, full, next_ids)?;
            }
        }

        stats.num_games += 1;
        stats.num_positions += num_positions;
    }

    Ok(())
}
