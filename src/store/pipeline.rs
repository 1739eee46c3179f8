//! Async store pipeline: буферы -> сортировщики -> один пишущий поток.
//!
//! Фиксированный набор переиспользуемых entry-буферов циркулирует между
//! продьюсерами (воркеры импорта) и двумя стадиями-консьюмерами. Вместо
//! тройки «очередь + condvar + mutex» — каналы crossbeam:
//!   - ограниченный канал пула буферов (закрытый пул = backpressure);
//!   - канал сортировки, его читают >=1 потоков-сортировщиков;
//!   - канал записи, его читает ровно один пишущий поток.
//! Обещание результата — bounded(1) канал, наполняемый построенным
//! range-индексом (или ошибкой записи).
//!
//! Сортировщики могут переставлять задания относительно порядка
//! scheduleUnordered; порядок на диске определяется id run'а, который
//! выдаёт партиция. Пишущий поток обрабатывает свою очередь FIFO.
//!
//! Завершение кооперативное: wait_for_completion закрывает канал
//! сортировки, дожидается сортировщиков (дочитают хвост очереди),
//! закрывает канал записи, дожидается писателя. Drop блокируется до
//! полного завершения.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::thread::JoinHandle;

use crate::metrics;

use super::entry::Entry;
use super::index::RangeIndex;
use super::run::write_run;

struct Job {
    path: PathBuf,
    buffer: Vec<Entry>,
    promise: Sender<Result<RangeIndex>>,
}

pub struct StorePipeline {
    buffer_rx: Receiver<Vec<Entry>>,
    sort_tx: Option<Sender<Job>>,
    write_tx: Option<Sender<Job>>,
    sorters: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl StorePipeline {
    /// num_buffers буферов ёмкостью buffer_capacity записей каждый;
    /// num_sort_threads >= 1.
    pub fn new(
        num_buffers: usize,
        buffer_capacity: usize,
        num_sort_threads: usize,
        granularity: usize,
    ) -> StorePipeline {
        assert!(num_buffers > 0, "pipeline needs at least one buffer");
        assert!(num_sort_threads >= 1, "pipeline needs a sorting thread");
        assert!(buffer_capacity > 0, "pipeline buffers must hold entries");

        let (buffer_tx, buffer_rx) = bounded::<Vec<Entry>>(num_buffers);
        for _ in 0..num_buffers {
            buffer_tx
                .send(Vec::with_capacity(buffer_capacity))
                .expect("preload buffer pool");
        }

        let (sort_tx, sort_rx) = unbounded::<Job>();
        let (write_tx, write_rx) = unbounded::<Job>();

        let mut sorters = Vec::with_capacity(num_sort_threads);
        for _ in 0..num_sort_threads {
            let rx = sort_rx.clone();
            let tx = write_tx.clone();
            sorters.push(std::thread::spawn(move || run_sorting_thread(rx, tx)));
        }
        drop(sort_rx);

        let writer = {
            let pool = buffer_tx;
            std::thread::spawn(move || run_writing_thread(write_rx, pool, granularity))
        };

        StorePipeline {
            buffer_rx,
            sort_tx: Some(sort_tx),
            write_tx: Some(write_tx),
            sorters,
            writer: Some(writer),
        }
    }

    /// Взять пустой буфер; блокируется, пока пул пуст.
    pub fn get_empty_buffer(&self) -> Result<Vec<Entry>> {
        let mut buffer = self
            .buffer_rx
            .recv()
            .context("store pipeline buffer pool is closed")?;
        buffer.clear();
        Ok(buffer)
    }

    /// Поставить несортированный буфер в очередь сортировки; обещание
    /// наполнится range-индексом после записи run'а.
    pub fn schedule_unordered(
        &self,
        path: PathBuf,
        buffer: Vec<Entry>,
    ) -> Result<Receiver<Result<RangeIndex>>> {
        let (promise, future) = bounded(1);
        self.sort_tx
            .as_ref()
            .ok_or_else(|| anyhow!("store pipeline already completed"))?
            .send(Job {
                path,
                buffer,
                promise,
            })
            .map_err(|_| anyhow!("store pipeline sorting stage is gone"))?;
        Ok(future)
    }

    /// Уже отсортированный буфер — мимо сортировки, сразу в запись.
    pub fn schedule_ordered(
        &self,
        path: PathBuf,
        buffer: Vec<Entry>,
    ) -> Result<Receiver<Result<RangeIndex>>> {
        let (promise, future) = bounded(1);
        self.write_tx
            .as_ref()
            .ok_or_else(|| anyhow!("store pipeline already completed"))?
            .send(Job {
                path,
                buffer,
                promise,
            })
            .map_err(|_| anyhow!("store pipeline writing stage is gone"))?;
        Ok(future)
    }

    /// Дождаться обработки всего запланированного и остановить потоки.
    pub fn wait_for_completion(&mut self) {
        if let Some(tx) = self.sort_tx.take() {
            drop(tx);
            for handle in self.sorters.drain(..) {
                let _ = handle.join();
            }
        }
        if let Some(tx) = self.write_tx.take() {
            drop(tx);
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StorePipeline {
    fn drop(&mut self) {
        self.wait_for_completion();
    }
}

fn run_sorting_thread(rx: Receiver<Job>, tx: Sender<Job>) {
    // recv() отдаёт хвост очереди и ошибается только после закрытия
    // канала продьюсером — это и есть сигнал завершения.
    while let Ok(mut job) = rx.recv() {
        sort_and_combine(&mut job.buffer);
        metrics::inc_buffers_sorted();
        if tx.send(job).is_err() {
            return;
        }
    }
}

/// Стабильная сортировка полным порядком ключа + схлопывание равных
/// ключей на месте (unique-с-combine).
pub(crate) fn sort_and_combine(buffer: &mut Vec<Entry>) {
    buffer.sort_by(|a, b| a.key().cmp_full(b.key()));
    buffer.dedup_by(|later, kept| {
        if kept.key().cmp_full(later.key()) == Ordering::Equal {
            let later = *later;
            kept.combine(&later);
            true
        } else {
            false
        }
    });
}

fn run_writing_thread(rx: Receiver<Job>, pool: Sender<Vec<Entry>>, granularity: usize) {
    while let Ok(mut job) = rx.recv() {
        let entries = job.buffer.len() as u64;
        let result = write_run(&job.path, &job.buffer, granularity);
        if result.is_ok() {
            metrics::inc_runs_written(entries);
        }

        job.buffer.clear();
        // Пул мог закрыться раньше потоков — буфер просто умирает.
        let _ = pool.send(job.buffer);
        let _ = job.promise.send(result);
    }
}
