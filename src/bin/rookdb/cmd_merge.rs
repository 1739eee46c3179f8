use anyhow::Result;
use std::path::PathBuf;

use RookDB::config::RookConfig;
use RookDB::db::Database;
use RookDB::store::MergeProgress;

pub fn exec(path: PathBuf, destination: Option<PathBuf>) -> Result<()> {
    let cfg = RookConfig::from_env();
    let mut db = Database::open(&path, cfg)?;

    let mut last_percent = u64::MAX;
    let mut progress = |p: MergeProgress| {
        let percent = (p.ratio() * 100.0) as u64;
        if percent != last_percent {
            last_percent = percent;
            eprintln!("merge: {}%", percent);
        }
    };

    match destination {
        None => db.merge_all(Some(&mut progress))?,
        Some(dest) => db.replicate_merge_all(&dest, Some(&mut progress))?,
    }
    println!("merge done");
    Ok(())
}
