//! Manifest — маленький файл-паспорт каталога БД.
//!
//! Формат <root>/manifest (LE):
//!   MAGIC8 = "RKDBMAN1"
//!   u32 endianness marker (ENDIAN_MARKER, записан little-endian)
//!   u32 crc32c(key bytes)
//!   u8  key_len
//!   key bytes
//!
//! Открытие чужого каталога даёт KeyMismatch; каталог, записанный с другим
//! порядком байт, даёт EndiannessMismatch (маркер читается перевёрнутым);
//! всё остальное — InvalidManifest. Фасад отказывается открывать каталог
//! при любом исходе, кроме Ok.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32c::crc32c;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::consts::{ENDIAN_MARKER, MANIFEST_FILE, MANIFEST_MAGIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestValidationResult {
    Ok,
    KeyMismatch,
    EndiannessMismatch,
    InvalidManifest,
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

/// Создать manifest; ошибка, если уже существует.
pub fn create_manifest(root: &Path, key: &str) -> Result<()> {
    let path = manifest_path(root);
    if path.exists() {
        return Err(anyhow!("manifest already exists at {}", path.display()));
    }
    if key.len() > u8::MAX as usize {
        return Err(anyhow!("manifest key too long: {} bytes", key.len()));
    }

    let mut bytes = Vec::with_capacity(8 + 4 + 4 + 1 + key.len());
    bytes.extend_from_slice(MANIFEST_MAGIC);
    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, ENDIAN_MARKER);
    bytes.extend_from_slice(&buf4);
    LittleEndian::write_u32(&mut buf4, crc32c(key.as_bytes()));
    bytes.extend_from_slice(&buf4);
    bytes.push(key.len() as u8);
    bytes.extend_from_slice(key.as_bytes());

    // tmp + rename, как и остальные маленькие файлы формата.
    let tmp = root.join(format!("{}.tmp", MANIFEST_FILE));
    let _ = std::fs::remove_file(&tmp);
    {
        let mut f = std::fs::File::create(&tmp)
            .with_context(|| format!("create manifest tmp {}", tmp.display()))?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Проверить manifest существующего каталога против ожидаемого ключа.
pub fn validate_manifest(root: &Path, key: &str) -> Result<ManifestValidationResult> {
    let path = manifest_path(root);
    let mut f = std::fs::File::open(&path)
        .with_context(|| format!("open manifest {}", path.display()))?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes)?;

    if bytes.len() < 8 + 4 + 4 + 1 {
        return Ok(ManifestValidationResult::InvalidManifest);
    }
    if &bytes[..8] != MANIFEST_MAGIC {
        return Ok(ManifestValidationResult::InvalidManifest);
    }

    let marker = LittleEndian::read_u32(&bytes[8..12]);
    if marker != ENDIAN_MARKER {
        if marker == ENDIAN_MARKER.swap_bytes() {
            return Ok(ManifestValidationResult::EndiannessMismatch);
        }
        return Ok(ManifestValidationResult::InvalidManifest);
    }

    let stored_crc = LittleEndian::read_u32(&bytes[12..16]);
    let key_len = bytes[16] as usize;
    if bytes.len() != 17 + key_len {
        return Ok(ManifestValidationResult::InvalidManifest);
    }
    let stored_key = &bytes[17..];
    if crc32c(stored_key) != stored_crc {
        return Ok(ManifestValidationResult::InvalidManifest);
    }
    if stored_key != key.as_bytes() {
        return Ok(ManifestValidationResult::KeyMismatch);
    }
    Ok(ManifestValidationResult::Ok)
}

/// Создать при отсутствии, иначе проверить; любой mismatch — ошибка.
pub fn create_or_validate_manifest(root: &Path, key: &str) -> Result<()> {
    if !manifest_path(root).exists() {
        return create_manifest(root, key);
    }
    match validate_manifest(root, key)? {
        ManifestValidationResult::Ok => Ok(()),
        ManifestValidationResult::KeyMismatch => Err(anyhow!(
            "manifest key mismatch at {} (expected '{}')",
            root.display(),
            key
        )),
        ManifestValidationResult::EndiannessMismatch => Err(anyhow!(
            "database at {} was written with a different endianness",
            root.display()
        )),
        ManifestValidationResult::InvalidManifest => {
            Err(anyhow!("invalid manifest at {}", root.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "rookdb-man-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn create_then_validate_ok() {
        let root = unique_root();
        create_manifest(&root, "rookdb_local").unwrap();
        assert_eq!(
            validate_manifest(&root, "rookdb_local").unwrap(),
            ManifestValidationResult::Ok
        );
        // Повторное создание запрещено.
        assert!(create_manifest(&root, "rookdb_local").is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn key_mismatch_detected() {
        let root = unique_root();
        create_manifest(&root, "rookdb_local").unwrap();
        assert_eq!(
            validate_manifest(&root, "other_format").unwrap(),
            ManifestValidationResult::KeyMismatch
        );
        assert!(create_or_validate_manifest(&root, "other_format").is_err());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn endianness_mismatch_detected() {
        let root = unique_root();
        create_manifest(&root, "rookdb_local").unwrap();

        // Перевернём маркер вручную.
        let path = manifest_path(&root);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..12].reverse();
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(
            validate_manifest(&root, "rookdb_local").unwrap(),
            ManifestValidationResult::EndiannessMismatch
        );
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn garbage_is_invalid() {
        let root = unique_root();
        std::fs::write(manifest_path(&root), b"not a manifest").unwrap();
        assert_eq!(
            validate_manifest(&root, "rookdb_local").unwrap(),
            ManifestValidationResult::InvalidManifest
        );
        let _ = std::fs::remove_dir_all(&root);
    }
}
