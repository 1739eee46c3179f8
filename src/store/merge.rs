//! Внешний k-way merge неизменяемых run'ов.
//!
//! Min-куча курсоров по полному порядку ключа (tie-break — id run'а, чтобы
//! комбинирование видело более ранний run первым и «первая партия»
//! оставалась минимальной). Равные соседние ключи на выходе схлопываются:
//! счётчики суммируются, смещение — минимум из валидных. Выход идёт через
//! буферизованный писатель; индекс сэмплируется на лету; прогресс
//! сообщается по чанкам выхода.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::consts::ENTRY_SIZE;
use crate::metrics;

use super::entry::Entry;
use super::index::RangeIndex;
use super::run::RunFile;

/// Отчёт о прогрессе: обработанные входные записи из общего числа.
#[derive(Debug, Clone, Copy)]
pub struct MergeProgress {
    pub work_done: u64,
    pub work_total: u64,
}

impl MergeProgress {
    pub fn ratio(&self) -> f64 {
        if self.work_total == 0 {
            1.0
        } else {
            self.work_done as f64 / self.work_total as f64
        }
    }
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(MergeProgress);

// Записей между отчётами прогресса.
const PROGRESS_CHUNK: u64 = 64 * 1024;

struct HeapItem {
    entry: Entry,
    run: usize,
    run_id: u32,
    pos: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap — max-куча; порядок инвертирован, чтобы наверху был
    // наименьший ключ (при равенстве — наименьший id run'а).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .key()
            .cmp_full(self.entry.key())
            .then_with(|| other.run_id.cmp(&self.run_id))
    }
}

/// Слить отсортированные run'ы в один новый файл + sidecar-индекс.
pub fn merge_runs(
    inputs: &[RunFile],
    out_path: &Path,
    granularity: usize,
    progress: Option<ProgressCallback<'_>>,
) -> Result<RangeIndex> {
    let work_total: u64 = inputs.iter().map(|r| r.entry_count()).sum();
    let mut report = progress;
    let mut work_done = 0u64;
    let mut last_report = 0u64;

    let file = File::create(out_path)
        .with_context(|| format!("create merged run {}", out_path.display()))?;
    let mut out = BufWriter::new(file);
    let mut sampler = RangeIndex::sampler(granularity);
    let mut entry_buf = [0u8; ENTRY_SIZE];
    let mut written = 0u64;

    let mut heap = BinaryHeap::with_capacity(inputs.len());
    for (run, file) in inputs.iter().enumerate() {
        if file.entry_count() > 0 {
            heap.push(HeapItem {
                entry: file.entry_at(0),
                run,
                run_id: file.id(),
                pos: 0,
            });
        }
    }

    let mut pending: Option<Entry> = None;

    while let Some(item) = heap.pop() {
        let same_key = pending
            .as_ref()
            .map_or(false, |p| p.key().cmp_full(item.entry.key()) == Ordering::Equal);
        if same_key {
            pending.as_mut().expect("pending entry").combine(&item.entry);
        } else {
            if let Some(p) = pending.take() {
                sample_and_write(&p, &mut out, &mut written, &mut sampler, &mut entry_buf)?;
            }
            pending = Some(item.entry);
        }

        work_done += 1;
        if work_done - last_report >= PROGRESS_CHUNK {
            last_report = work_done;
            if let Some(cb) = report.as_mut() {
                cb(MergeProgress {
                    work_done,
                    work_total,
                });
            }
        }

        let next_pos = item.pos + 1;
        let run = &inputs[item.run];
        if next_pos < run.entry_count() {
            heap.push(HeapItem {
                entry: run.entry_at(next_pos),
                run: item.run,
                run_id: item.run_id,
                pos: next_pos,
            });
        }
    }

    if let Some(p) = pending {
        sample_and_write(&p, &mut out, &mut written, &mut sampler, &mut entry_buf)?;
    }

    out.flush()?;
    out.get_ref().sync_data()?;

    let index = sampler.finish();
    index.write_sidecar(out_path)?;

    metrics::add_merge(inputs.len() as u64, written);
    if let Some(cb) = report.as_mut() {
        cb(MergeProgress {
            work_done: work_total,
            work_total,
        });
    }
    Ok(index)
}

fn sample_and_write(
    entry: &Entry,
    out: &mut BufWriter<File>,
    written: &mut u64,
    sampler: &mut super::index::IndexSampler,
    buf: &mut [u8; ENTRY_SIZE],
) -> Result<()> {
    sampler.observe(entry.key());
    entry.write_to(buf);
    out.write_all(buf)?;
    *written += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entry::{Key, KeyOrder, PackedCountAndGameOffset};
    use crate::store::run::write_run;
    use std::path::PathBuf;

    fn unique_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rookdb-merge-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn entry(h: u32, count: u64, offset: u64) -> Entry {
        Entry::from_parts(
            Key::from_limbs([h, 0, 0, 0]),
            PackedCountAndGameOffset::pack(count, offset),
        )
    }

    #[test]
    fn merge_is_deterministic_and_combining() {
        let dir = unique_dir();
        // [A=1:10, B=1:5, C=2:3] и [A=1:4, C=2:1, D=3:7] — ключи A=1, B=1? —
        // здесь ключи различны по хэшу: A,B,C,D = 1,2,3,4.
        let run0 = vec![entry(1, 10, 100), entry(2, 5, 200), entry(3, 3, 300)];
        let run1 = vec![entry(1, 4, 50), entry(3, 1, 30), entry(4, 7, 70)];

        let i0 = write_run(&dir.join("0"), &run0, 1024).unwrap();
        let i1 = write_run(&dir.join("1"), &run1, 1024).unwrap();
        let inputs = vec![
            RunFile::open_with_index(&dir.join("0"), i0).unwrap(),
            RunFile::open_with_index(&dir.join("1"), i1).unwrap(),
        ];

        let out_path = dir.join("2");
        let mut reports = Vec::new();
        let mut cb = |p: MergeProgress| reports.push(p);
        let index = merge_runs(&inputs, &out_path, 2, Some(&mut cb)).unwrap();

        let merged = RunFile::open_with_index(&out_path, index).unwrap();
        assert_eq!(merged.entry_count(), 4);

        let expect = [(1u32, 14u64, 50u64), (2, 5, 200), (3, 4, 30), (4, 7, 70)];
        for (i, (h, count, offset)) in expect.iter().enumerate() {
            let e = merged.entry_at(i as u64);
            assert_eq!(e.key().limbs()[0], *h);
            assert_eq!(e.count(), *count);
            assert_eq!(e.game_offset(), *offset);
        }

        // Сохранение суммарного счётчика.
        let input_total: u64 = inputs.iter().map(|r| r.total_count()).sum();
        assert_eq!(merged.total_count(), input_total);

        // Индекс корректно ограничивает каждый ключ.
        for h in 1..=4u32 {
            let key = Key::from_limbs([h, 0, 0, 0]);
            let (b, e) = merged.equal_range(&key, KeyOrder::Full);
            assert_eq!(e - b, 1, "key {}", h);
        }

        assert!(!reports.is_empty());
        assert_eq!(reports.last().unwrap().work_done, 6);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn merge_of_empty_inputs_writes_empty_run() {
        let dir = unique_dir();
        let out_path = dir.join("0");
        let index = merge_runs(&[], &out_path, 1024, None).unwrap();
        assert!(index.is_empty());
        assert_eq!(std::fs::metadata(&out_path).unwrap().len(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
