//! Range index — разреженная карта key -> позиция entry в run-файле.
//!
//! Сэмпл берётся с каждой granularity-й записи (первая запись — всегда),
//! поэтому точный диапазон любого ключа целиком лежит между двумя
//! соседними сэмплами. Sidecar <id>_index хранит сэмплы подряд (LE):
//! [key 16 байт][entry_pos u64].

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::consts::{INDEX_SAMPLE_SIZE, INDEX_SUFFIX};

use super::entry::{Entry, Key, KeyOrder};

#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    samples: Vec<(Key, u64)>,
}

impl RangeIndex {
    pub fn new(samples: Vec<(Key, u64)>) -> RangeIndex {
        RangeIndex { samples }
    }

    /// Построить индекс по отсортированному массиву записей.
    pub fn build(entries: &[Entry], granularity: usize) -> RangeIndex {
        let granularity = granularity.max(1);
        let mut samples = Vec::with_capacity(entries.len() / granularity + 1);
        let mut at = 0usize;
        while at < entries.len() {
            samples.push((*entries[at].key(), at as u64));
            at += granularity;
        }
        RangeIndex { samples }
    }

    /// Сэмплирующий аккумулятор для потоковой записи (merge).
    pub fn sampler(granularity: usize) -> IndexSampler {
        IndexSampler {
            granularity: granularity.max(1),
            samples: Vec::new(),
            seen: 0,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[(Key, u64)] {
        &self.samples
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Консервативные границы поиска ключа: [lo, hi) по позициям записей.
    /// Возвращаемый интервал гарантированно содержит equal_range ключа.
    pub fn search_bounds(&self, key: &Key, order: KeyOrder, entry_count: u64) -> (u64, u64) {
        // Последний сэмпл строго меньше ключа ограничивает снизу.
        let lo_idx = self
            .samples
            .partition_point(|(k, _)| order.cmp(k, key) == std::cmp::Ordering::Less);
        let lo = if lo_idx == 0 {
            0
        } else {
            self.samples[lo_idx - 1].1
        };

        // Первый сэмпл строго больше ключа ограничивает сверху.
        let hi_idx = self
            .samples
            .partition_point(|(k, _)| order.cmp(k, key) != std::cmp::Ordering::Greater);
        let hi = if hi_idx == self.samples.len() {
            entry_count
        } else {
            // Записи после позиции сэмпла не меньше его ключа; сам сэмпл
            // может ещё быть равен, поэтому включаем его позицию + 1.
            (self.samples[hi_idx].1 + 1).min(entry_count)
        };

        (lo, hi.max(lo))
    }

    // -------- sidecar I/O --------

    pub fn sidecar_path(run_path: &Path) -> PathBuf {
        let mut name = run_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(INDEX_SUFFIX);
        run_path.with_file_name(name)
    }

    pub fn write_sidecar(&self, run_path: &Path) -> Result<()> {
        let path = Self::sidecar_path(run_path);
        let mut bytes = Vec::with_capacity(self.samples.len() * INDEX_SAMPLE_SIZE);
        let mut buf = [0u8; INDEX_SAMPLE_SIZE];
        for (key, pos) in &self.samples {
            for (i, limb) in key.limbs().iter().enumerate() {
                LittleEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *limb);
            }
            LittleEndian::write_u64(&mut buf[16..24], *pos);
            bytes.extend_from_slice(&buf);
        }
        std::fs::write(&path, &bytes)
            .with_context(|| format!("write range index {}", path.display()))
    }

    pub fn read_sidecar(run_path: &Path) -> Result<RangeIndex> {
        let path = Self::sidecar_path(run_path);
        let mut file = File::open(&path)
            .with_context(|| format!("open range index {}", path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.len() % INDEX_SAMPLE_SIZE != 0 {
            bail!(
                "range index {} has invalid length {}",
                path.display(),
                bytes.len()
            );
        }

        let mut samples = Vec::with_capacity(bytes.len() / INDEX_SAMPLE_SIZE);
        for chunk in bytes.chunks_exact(INDEX_SAMPLE_SIZE) {
            let limbs = [
                LittleEndian::read_u32(&chunk[0..4]),
                LittleEndian::read_u32(&chunk[4..8]),
                LittleEndian::read_u32(&chunk[8..12]),
                LittleEndian::read_u32(&chunk[12..16]),
            ];
            samples.push((Key::from_limbs(limbs), LittleEndian::read_u64(&chunk[16..24])));
        }
        Ok(RangeIndex { samples })
    }
}

/// Потоковое сэмплирование при записи run-файла.
pub struct IndexSampler {
    granularity: usize,
    samples: Vec<(Key, u64)>,
    seen: u64,
}

impl IndexSampler {
    pub fn observe(&mut self, key: &Key) {
        if self.seen % self.granularity as u64 == 0 {
            self.samples.push((*key, self.seen));
        }
        self.seen += 1;
    }

    pub fn finish(self) -> RangeIndex {
        RangeIndex {
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::PackedCountAndGameOffset;

    fn key_with_hash(h: u32) -> Key {
        Key::from_limbs([h, 0, 0, 0])
    }

    fn entries_with_hashes(hashes: &[u32]) -> Vec<Entry> {
        hashes
            .iter()
            .map(|&h| Entry::from_parts(key_with_hash(h), PackedCountAndGameOffset::single(0)))
            .collect()
    }

    #[test]
    fn samples_are_monotonic_and_on_entries() {
        let entries = entries_with_hashes(&[1, 1, 2, 3, 5, 8, 8, 9, 13, 21]);
        let index = RangeIndex::build(&entries, 3);

        let mut prev = None;
        for (key, pos) in index.samples() {
            assert_eq!(entries[*pos as usize].key().cmp_full(key), std::cmp::Ordering::Equal);
            if let Some(p) = prev {
                assert!(*pos > p);
            }
            prev = Some(*pos);
        }
    }

    #[test]
    fn bounds_contain_equal_range() {
        let hashes = [1u32, 1, 2, 2, 2, 3, 4, 4, 5, 6, 7, 7, 7, 8, 9];
        let entries = entries_with_hashes(&hashes);
        let index = RangeIndex::build(&entries, 4);

        for probe in 0..=10u32 {
            let key = key_with_hash(probe);
            let (lo, hi) =
                index.search_bounds(&key, KeyOrder::Full, entries.len() as u64);
            let true_lo = hashes.iter().position(|&h| h >= probe).unwrap_or(hashes.len());
            let true_hi = hashes.iter().rposition(|&h| h <= probe).map_or(0, |p| p + 1);
            if true_lo < true_hi {
                assert!(lo as usize <= true_lo, "probe {}", probe);
                assert!(hi as usize >= true_hi, "probe {}", probe);
            }
        }
    }

    #[test]
    fn sampler_matches_build() {
        let entries = entries_with_hashes(&(0..100).collect::<Vec<u32>>());
        let built = RangeIndex::build(&entries, 10);
        let mut sampler = RangeIndex::sampler(10);
        for e in &entries {
            sampler.observe(e.key());
        }
        let streamed = sampler.finish();
        assert_eq!(built.samples().len(), streamed.samples().len());
        for (a, b) in built.samples().iter().zip(streamed.samples()) {
            assert_eq!(a.1, b.1);
            assert_eq!(a.0.cmp_full(&b.0), std::cmp::Ordering::Equal);
        }
    }
}
