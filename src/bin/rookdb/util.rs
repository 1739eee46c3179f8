use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use RookDB::chess::GameLevel;
use RookDB::db::ImportableFile;

/// Разбор list-файла импорта: по строке "<level>;<path>",
/// пустые строки и '#'-комментарии пропускаются.
pub fn parse_archive_list_file(path: &Path) -> Result<Vec<ImportableFile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read archive list {}", path.display()))?;

    let mut files = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (level_str, file_path) = line
            .split_once(';')
            .ok_or_else(|| anyhow!("{}:{}: expected '<level>;<path>'", path.display(), lineno + 1))?;
        let level = GameLevel::from_str(level_str.trim())
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        files.push(ImportableFile::new(
            PathBuf::from(file_path.trim()),
            level,
        )?);
    }
    Ok(files)
}
