use anyhow::{Context, Result};
use std::path::PathBuf;

use RookDB::config::RookConfig;
use RookDB::db::FormatRegistry;

use crate::util::parse_archive_list_file;

pub fn exec(
    registry: &FormatRegistry,
    format: String,
    destination: PathBuf,
    pgn_list_file: PathBuf,
    temp: Option<PathBuf>,
) -> Result<()> {
    let cfg = RookConfig::from_env();
    let files = parse_archive_list_file(&pgn_list_file)?;

    let stats = match temp {
        None => {
            let mut db = registry.create(&format, &destination, cfg)?;
            db.import(&files, 0)?
        }
        Some(temp) => {
            // Импорт во временный каталог, затем merge-реплика в целевой.
            let stats = {
                let mut db = registry.create(&format, &temp, cfg)?;
                let stats = db.import(&files, 0)?;
                db.replicate_merge_all(&destination, None)?;
                stats
            };
            std::fs::remove_dir_all(&temp)
                .with_context(|| format!("remove temp {}", temp.display()))?;
            stats
        }
    };

    println!(
        "imported {} games ({} skipped), {} positions",
        stats.total_games(),
        stats.total_skipped_games(),
        stats.total_positions()
    );
    Ok(())
}
