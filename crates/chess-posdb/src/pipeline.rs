//! The asynchronous store pipeline.
//!
//! Ingest threads fill fixed-capacity buffers of index entries and hand
//! them off here. K sort workers stably sort each buffer; one writer
//! worker streams the sorted records to the partition file, builds the
//! range index along the way, writes the sidecar, and recycles the buffer
//! into the bounded pool. Ingest threads asking for an empty buffer block
//! until one comes back, which bounds the memory of the whole import.
//!
//! Buffer ownership moves one way: pool -> ingest -> sort queue -> write
//! queue -> pool. Shutdown drops the sort queue first and joins sort
//! workers before the writer, so every pending sort reaches disk.

use crate::store::{RangeIndex, RangeIndexBuilder};
use crate::{DatabaseError, IndexEntry};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

struct Job {
    path: PathBuf,
    index_path: PathBuf,
    buffer: Vec<IndexEntry>,
    completion: Sender<Result<RangeIndex, String>>,
}

/// Completion handle for one scheduled buffer.
///
/// Resolves to the range index the writer built for the file. A worker
/// failure (including a panic, which drops the sender) surfaces here.
pub struct WriteCompletion {
    receiver: Receiver<Result<RangeIndex, String>>,
}

impl WriteCompletion {
    /// Blocks until the file and its sidecar are on disk.
    pub fn wait(self) -> Result<RangeIndex, DatabaseError> {
        match self.receiver.recv() {
            Ok(Ok(index)) => Ok(index),
            Ok(Err(message)) => Err(DatabaseError::WorkerFailed(message)),
            Err(_) => Err(DatabaseError::WorkerFailed(
                "writer worker exited before completing the job".to_string(),
            )),
        }
    }
}

/// The sort/write worker pool shared by all ingest tasks of one import.
pub struct StorePipeline {
    sort_tx: Option<Sender<Job>>,
    write_tx: Option<Sender<Job>>,
    pool_rx: Receiver<Vec<IndexEntry>>,
    sort_workers: Vec<JoinHandle<()>>,
    write_worker: Option<JoinHandle<()>>,
}

impl StorePipeline {
    /// Starts `sort_workers` sorters and one writer, with a pool of
    /// `pool_buffers` empty buffers of `buffer_capacity` entries each.
    pub fn new(sort_workers: usize, pool_buffers: usize, buffer_capacity: usize) -> Self {
        let (sort_tx, sort_rx) = unbounded::<Job>();
        let (write_tx, write_rx) = unbounded::<Job>();
        let (pool_tx, pool_rx) = bounded::<Vec<IndexEntry>>(pool_buffers.max(1));

        for _ in 0..pool_buffers {
            pool_tx
                .send(Vec::with_capacity(buffer_capacity))
                .expect("pool holds its initial population");
        }

        let sorters: Vec<JoinHandle<()>> = (0..sort_workers.max(1))
            .map(|_| {
                let sort_rx = sort_rx.clone();
                let write_tx = write_tx.clone();
                std::thread::spawn(move || {
                    while let Ok(mut job) = sort_rx.recv() {
                        job.buffer.sort();
                        if write_tx.send(job).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        let writer = std::thread::spawn(move || {
            while let Ok(mut job) = write_rx.recv() {
                let result = write_sorted_file(&job).map_err(|e| e.to_string());
                job.buffer.clear();
                // Refill the pool without blocking: the final flush of an
                // import hands over more buffers than the pool holds, and
                // the surplus is simply freed.
                let _ = pool_tx.try_send(job.buffer);
                let _ = job.completion.send(result);
            }
        });

        StorePipeline {
            sort_tx: Some(sort_tx),
            write_tx: Some(write_tx),
            pool_rx,
            sort_workers: sorters,
            write_worker: Some(writer),
        }
    }

    /// Takes an empty buffer from the pool, blocking until one is free.
    pub fn get_empty_buffer(&self) -> Vec<IndexEntry> {
        self.pool_rx
            .recv()
            .expect("buffer pool outlives the pipeline")
    }

    /// Schedules an unsorted buffer: sort, then write.
    pub fn schedule_unsorted(
        &self,
        path: PathBuf,
        index_path: PathBuf,
        buffer: Vec<IndexEntry>,
    ) -> WriteCompletion {
        self.schedule(path, index_path, buffer, false)
    }

    /// Schedules an already-sorted buffer straight onto the write queue.
    pub fn schedule_sorted(
        &self,
        path: PathBuf,
        index_path: PathBuf,
        buffer: Vec<IndexEntry>,
    ) -> WriteCompletion {
        self.schedule(path, index_path, buffer, true)
    }

    fn schedule(
        &self,
        path: PathBuf,
        index_path: PathBuf,
        buffer: Vec<IndexEntry>,
        sorted: bool,
    ) -> WriteCompletion {
        let (completion_tx, completion_rx) = bounded(1);
        let job = Job {
            path,
            index_path,
            buffer,
            completion: completion_tx,
        };
        let queue = if sorted {
            self.write_tx.as_ref()
        } else {
            self.sort_tx.as_ref()
        };
        queue
            .expect("pipeline is running")
            .send(job)
            .expect("workers are running");
        WriteCompletion {
            receiver: completion_rx,
        }
    }

    /// Drains both queues and joins all workers, sorters first.
    pub fn wait_for_completion(mut self) -> Result<(), DatabaseError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), DatabaseError> {
        drop(self.sort_tx.take());
        let mut failed = false;
        for worker in self.sort_workers.drain(..) {
            failed |= worker.join().is_err();
        }
        drop(self.write_tx.take());
        if let Some(writer) = self.write_worker.take() {
            failed |= writer.join().is_err();
        }
        if failed {
            return Err(DatabaseError::WorkerFailed(
                "a pipeline worker panicked".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for StorePipeline {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Writer-worker body: stream the records, sample the range index, write
/// the sidecar.
fn write_sorted_file(job: &Job) -> std::io::Result<RangeIndex> {
    debug_assert!(job.buffer.windows(2).all(|w| w[0] <= w[1]));

    let mut writer = BufWriter::new(std::fs::File::create(&job.path)?);
    let mut builder = RangeIndexBuilder::new();
    for (offset, entry) in job.buffer.iter().enumerate() {
        writer.write_all(&entry.to_bytes())?;
        builder.record(entry.signature(), offset as u64);
    }
    writer.flush()?;

    let index = builder.finish();
    index.write_to(&job.index_path)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImmutableSpan;
    use chess_board::PositionSignature;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sig(n: u64) -> PositionSignature {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&n.to_be_bytes());
        PositionSignature::from_bytes(bytes)
    }

    #[test]
    fn sorts_writes_and_recycles_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = StorePipeline::new(2, 2, 4096);
        let mut rng = StdRng::seed_from_u64(99);

        let mut completions = Vec::new();
        for file_id in 0..4u32 {
            let mut buffer = pipeline.get_empty_buffer();
            for g in 0..3000u32 {
                buffer.push(IndexEntry::new(sig(rng.random_range(0..500)), g));
            }
            completions.push((
                file_id,
                pipeline.schedule_unsorted(
                    dir.path().join(file_id.to_string()),
                    dir.path().join(format!("{file_id}_index")),
                    buffer,
                ),
            ));
        }

        for (file_id, completion) in completions {
            let index = completion.wait().unwrap();
            assert!(!index.entries().is_empty());

            let span: ImmutableSpan<IndexEntry> =
                ImmutableSpan::open(&dir.path().join(file_id.to_string())).unwrap();
            assert_eq!(span.len(), 3000);
            let records: Vec<IndexEntry> = span.iter().collect();
            assert!(records.windows(2).all(|w| w[0] <= w[1]), "file is sorted");

            // The sidecar must agree with what the completion returned.
            let loaded =
                crate::store::RangeIndex::load(&dir.path().join(format!("{file_id}_index")))
                    .unwrap();
            assert_eq!(loaded.entries(), index.entries());
        }

        pipeline.wait_for_completion().unwrap();
    }

    #[test]
    fn schedule_sorted_bypasses_the_sorters() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = StorePipeline::new(1, 1, 16);

        let mut buffer = pipeline.get_empty_buffer();
        for k in 0..10u64 {
            buffer.push(IndexEntry::new(sig(k), k as u32));
        }
        let completion = pipeline.schedule_sorted(
            dir.path().join("0"),
            dir.path().join("0_index"),
            buffer,
        );
        completion.wait().unwrap();

        let span: ImmutableSpan<IndexEntry> =
            ImmutableSpan::open(&dir.path().join("0")).unwrap();
        assert_eq!(span.len(), 10);
        pipeline.wait_for_completion().unwrap();
    }

    #[test]
    fn buffer_pool_is_bounded() {
        let pipeline = StorePipeline::new(1, 3, 8);
        // Drain the pool completely; a fourth request would block forever.
        let a = pipeline.get_empty_buffer();
        let b = pipeline.get_empty_buffer();
        let c = pipeline.get_empty_buffer();
        assert!(a.capacity() >= 8);
        assert!(b.is_empty() && c.is_empty());
        assert!(pipeline.pool_rx.is_empty());
        drop((a, b, c));
        pipeline.wait_for_completion().unwrap();
    }
}
