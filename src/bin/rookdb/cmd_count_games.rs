use anyhow::Result;
use std::path::PathBuf;

use RookDB::bcgn::BcgnReader;
use RookDB::config::RookConfig;
use RookDB::db::ImportableFileType;
use RookDB::pgn::LazyPgnReader;

pub fn exec(path: PathBuf) -> Result<()> {
    let cfg = RookConfig::from_env();

    let mut count = 0u64;
    match ImportableFileType::from_path(&path)? {
        ImportableFileType::Pgn => {
            let mut reader = LazyPgnReader::open(&path, cfg.pgn_buffer_bytes)?;
            while reader.next_game()?.is_some() {
                count += 1;
            }
        }
        ImportableFileType::Bcgn => {
            let mut reader = BcgnReader::open(&path, cfg.bcgn_buffer_bytes)?;
            while reader.next_game()?.is_some() {
                count += 1;
            }
        }
    }

    println!("{}", count);
    Ok(())
}
