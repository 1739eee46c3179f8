use anyhow::Result;
use std::path::PathBuf;
use std::time::Instant;

use RookDB::config::RookConfig;
use RookDB::pgn::LazyPgnReader;

/// Прогон PGN-файла: считает позиции и меряет пропускную способность.
pub fn exec(path: PathBuf) -> Result<()> {
    let cfg = RookConfig::from_env();
    let size = std::fs::metadata(&path)?.len();

    let mut reader = LazyPgnReader::open(&path, cfg.pgn_buffer_bytes)?;
    let mut positions = 0u64;
    let started = Instant::now();

    while let Some(game) = reader.next_game()? {
        let mut iter = game.positions()?;
        while iter.next_position()?.is_some() {
            positions += 1;
        }
    }

    let secs = started.elapsed().as_secs_f64();
    println!("{} positions in {:.3}s", positions, secs);
    if secs > 0.0 {
        println!("throughput {:.1} MB/s", size as f64 / secs / 1e6);
    }
    Ok(())
}
