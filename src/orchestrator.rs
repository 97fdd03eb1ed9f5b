//! Pipeline orchestration: a work-stealing pool per stage, joined before
//! the next stage begins (spec.md §5). Grounded on the teacher's
//! `rayon`-based profile builders (`profiles/ultra.rs`'s per-shard worker
//! loop) for the "own a private builder, flush behind a shard mutex"
//! shape, and on `original_source/src/indexer/index_manager.cpp`'s
//! `add_index_files_threaded` for the stage-then-join pattern (a
//! `thread_pool` for ingestion, joined, then a separate merge pass).

use crate::error::BuilderError;
use crate::record::Record;
use crate::shard_builder::{BuilderConfig, ShardBuilder};
use crate::sharded_index::{ShardId, ShardLayout};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// One mutex per shard id, guarding that shard's append log file handle
/// (spec.md §5 "Flush concurrency"). Entries are created lazily so the
/// map only grows to the shards actually touched by a run.
#[derive(Default)]
pub struct AppendLocks {
    locks: DashMap<ShardId, Arc<Mutex<()>>>,
}

impl AppendLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `shard`. Acquire-append-release,
    /// per spec.md: "A worker acquires mutex[shard_id], appends, releases."
    pub fn with_lock<T>(&self, shard: ShardId, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(shard)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }
}

/// Runs the ingestion stage: distributes `items` across `workers` pool
/// threads, each task owning a private `ShardBuilder` (via `new_builder`)
/// and flushing through `locks` whenever the builder reports `full()`.
/// No builder state is shared across workers (spec.md §5 "Ingestion
/// concurrency").
pub struct IngestPool {
    pool: ThreadPool,
}

impl IngestPool {
    /// Sizes the pool to the host's logical core count.
    pub fn new_default() -> Result<Self, BuilderError> {
        Self::new(num_cpus::get())
    }

    pub fn new(workers: usize) -> Result<Self, BuilderError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| BuilderError::InvariantViolation {
                shard: ShardId(0),
                detail: format!("failed to build ingest pool: {e}"),
            })?;
        Ok(Self { pool })
    }

    /// Splits `items` into `self.pool`'s worker count worth of chunks and
    /// processes each chunk on one task. Each task owns a private
    /// `HashMap<ShardId, ShardBuilder<R>>` built lazily via `builder_for`
    /// — no builder state crosses tasks (spec.md §5 "Ingestion
    /// concurrency") — and flushes a shard's builder through `locks`
    /// whenever it reports `full()`, plus once more at the end of the
    /// chunk to drain anything left over.
    pub fn run<T, R>(
        &self,
        items: &[T],
        locks: &AppendLocks,
        builder_for: impl Fn(ShardId) -> ShardBuilder<R> + Sync,
        route_and_record: impl Fn(&T) -> (ShardId, u64, R) + Sync,
    ) -> Vec<Result<(), BuilderError>>
    where
        T: Sync,
        R: Record + Send,
    {
        let workers = self.pool.current_num_threads().max(1);
        let chunk_size = (items.len() + workers - 1) / workers.max(1);
        let chunk_size = chunk_size.max(1);

        self.pool.install(|| {
            use rayon::prelude::*;
            items
                .par_chunks(chunk_size)
                .map(|chunk| {
                    let mut builders: std::collections::HashMap<ShardId, ShardBuilder<R>> =
                        std::collections::HashMap::new();

                    for item in chunk {
                        let (shard, key, record) = route_and_record(item);
                        let builder = builders.entry(shard).or_insert_with(|| builder_for(shard));
                        builder.add(key, record)?;
                        if builder.full() {
                            locks.with_lock(shard, || builder.append())?;
                        }
                    }

                    for (shard, mut builder) in builders {
                        locks.with_lock(shard, || builder.append())?;
                    }
                    Ok(())
                })
                .collect()
        })
    }
}

/// Runs the merge stage: one task per shard, no locking required because
/// readers are quiescent during a build (spec.md §5 "Merge concurrency").
/// Must run in a pool created after the ingest pool has been joined.
pub struct MergePool {
    pool: ThreadPool,
}

impl MergePool {
    /// Sizes the pool to the host's logical core count.
    pub fn new_default() -> Result<Self, BuilderError> {
        Self::new(num_cpus::get())
    }

    pub fn new(workers: usize) -> Result<Self, BuilderError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| BuilderError::InvariantViolation {
                shard: ShardId(0),
                detail: format!("failed to build merge pool: {e}"),
            })?;
        Ok(Self { pool })
    }

    /// Merges every shard in `shard_ids`, each through its own
    /// `ShardBuilder`, then runs the optimize pass on it.
    pub fn run<R: Record + Send>(
        &self,
        shard_ids: &[ShardId],
        layout: &ShardLayout,
        hash_table_size: usize,
        config: BuilderConfig,
    ) -> Vec<Result<(), BuilderError>> {
        self.pool.install(|| {
            use rayon::prelude::*;
            shard_ids
                .par_iter()
                .map(|&shard| {
                    let mut builder: ShardBuilder<R> = ShardBuilder::new(
                        shard,
                        layout.data_path(shard),
                        layout.meta_path(shard),
                        layout.append_log_path(shard),
                        hash_table_size,
                        config,
                    );
                    builder.merge()?;
                    builder.optimize()?;
                    Ok(())
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::WordRecord;

    #[test]
    fn ingest_then_merge_round_trip_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), "word_index");
        layout.ensure_directories(4).unwrap();

        let locks = AppendLocks::new();
        let ingest = IngestPool::new(2).unwrap();

        let items: Vec<(u64, WordRecord)> = (0..40)
            .map(|i| (i as u64, WordRecord::new(i as u64, 1.0)))
            .collect();

        let layout_ref = &layout;
        let results = ingest.run(
            &items,
            &locks,
            |shard| {
                ShardBuilder::new(
                    shard,
                    layout_ref.data_path(shard),
                    layout_ref.meta_path(shard),
                    layout_ref.append_log_path(shard),
                    64,
                    BuilderConfig::default(),
                )
            },
            |&(key, record)| (ShardId((key % 4) as u32), key, record),
        );
        for r in &results {
            assert!(r.is_ok());
        }

        let merge = MergePool::new(2).unwrap();
        let shard_ids: Vec<ShardId> = (0..4).map(ShardId).collect();
        let merge_results =
            merge.run::<WordRecord>(&shard_ids, &layout, 64, BuilderConfig::default());
        for r in &merge_results {
            assert!(r.is_ok());
        }

        let mut reader: crate::shard_reader::ShardReader<crate::byte_source::FileSource, WordRecord> =
            crate::shard_reader::ShardReader::open_file(
                ShardId(0),
                layout.data_path(ShardId(0)),
                layout.meta_path(ShardId(0)),
                64,
            )
            .unwrap();
        let found = reader.find(0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].doc_id, 0);
    }
}
