//! Sharded index facade: routes a key to one of `N` shards and fans a
//! query out across shards, combining per-shard results the way spec.md
//! §4.5 requires. Grounded on `original_source/src/indexer/
//! sharded_index.h`'s `sharded_index<data_record>::find` (per-key
//! routing, `::algorithm::intersection` across per-key result sets) and on
//! the teacher's `profiles/ultra.rs` sharded `IndexShard` layout (`key &
//! SHARD_MASK` routing, one lock per shard) for the concurrent-access
//! shape.

use crate::bitmap::PostingBitmap;
use crate::byte_source::{ByteSource, FileSource};
use crate::config::MOUNT_COUNT;
use crate::error::ReaderError;
use crate::record::Record;
use crate::shard_reader::ShardReader;
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};

/// A shard's ordinal within one logical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conventional on-disk layout: `/<mount>/<db_name>/<shard_id>.data` and
/// `.meta`, `<mount>` chosen by `shard_id mod M` to spread I/O across
/// devices (spec.md §6).
#[derive(Debug, Clone)]
pub struct ShardLayout {
    pub root: PathBuf,
    pub db_name: String,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>, db_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            db_name: db_name.into(),
        }
    }

    fn mount(&self, shard: ShardId) -> String {
        (shard.0 as usize % MOUNT_COUNT).to_string()
    }

    pub fn data_path(&self, shard: ShardId) -> PathBuf {
        self.root
            .join(self.mount(shard))
            .join(&self.db_name)
            .join(format!("{}.data", shard.0))
    }

    pub fn meta_path(&self, shard: ShardId) -> PathBuf {
        self.root
            .join(self.mount(shard))
            .join(&self.db_name)
            .join(format!("{}.meta", shard.0))
    }

    pub fn append_log_path(&self, shard: ShardId) -> PathBuf {
        self.root
            .join(self.mount(shard))
            .join(&self.db_name)
            .join(format!("{}.append", shard.0))
    }

    pub fn ensure_directories(&self, num_shards: usize) -> std::io::Result<()> {
        for shard in 0..num_shards as u32 {
            let dir = self
                .root
                .join(self.mount(ShardId(shard)))
                .join(&self.db_name);
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// One logical index, sharded `N` ways, `shard = key mod N`.
pub struct ShardedIndex<R: Record> {
    layout: ShardLayout,
    num_shards: usize,
    hash_table_size: usize,
    _record: std::marker::PhantomData<R>,
}

impl<R: Record + Send + Sync> ShardedIndex<R> {
    pub fn new(layout: ShardLayout, num_shards: usize, hash_table_size: usize) -> Self {
        Self {
            layout,
            num_shards,
            hash_table_size,
            _record: std::marker::PhantomData,
        }
    }

    pub fn shard_for(&self, key: u64) -> ShardId {
        let shard = ShardId((key % self.num_shards as u64) as u32);
        log::debug!("key {key} routes to shard {shard}");
        shard
    }

    fn open_reader(&self, shard: ShardId) -> Result<ShardReader<FileSource, R>, ReaderError> {
        ShardReader::open_file(
            shard,
            self.layout.data_path(shard),
            self.layout.meta_path(shard),
            self.hash_table_size,
        )
    }

    /// Fetches all records for `key` from the one shard it routes to.
    pub fn find(&self, key: u64) -> Result<Vec<R>, ReaderError> {
        let shard = self.shard_for(key);
        match self.open_reader(shard) {
            Ok(mut reader) => reader.find(key),
            Err(ReaderError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Groups `keys` by the shard they route to.
    fn group_keys_by_shard(&self, keys: &[u64]) -> Vec<(ShardId, Vec<u64>)> {
        let mut by_shard: std::collections::BTreeMap<ShardId, Vec<u64>> =
            std::collections::BTreeMap::new();
        for &key in keys {
            by_shard.entry(self.shard_for(key)).or_default().push(key);
        }
        by_shard.into_iter().collect()
    }

    /// Per-shard AND-intersection across `keys`' bitmaps, materialized to
    /// records and concatenated across shards. Intersection is computed
    /// within each shard because document ids are shard-local (spec.md
    /// §4.5): a global intersection across shards would be meaningless.
    pub fn find_intersection(&self, keys: &[u64]) -> Result<Vec<R>, ReaderError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self.group_keys_by_shard(keys);
        let results: Vec<Result<Vec<R>, ReaderError>> = groups
            .par_iter()
            .map(|(shard, shard_keys)| self.intersect_within_shard(*shard, shard_keys))
            .collect();

        let mut out = Vec::new();
        for r in results {
            out.extend(r?);
        }
        Ok(out)
    }

    fn intersect_within_shard(&self, shard: ShardId, keys: &[u64]) -> Result<Vec<R>, ReaderError> {
        let mut reader = match self.open_reader(shard) {
            Ok(r) => r,
            Err(ReaderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut acc: Option<PostingBitmap> = None;
        for &key in keys {
            let bitmap = reader.find_bitmap(key)?;
            acc = Some(match acc {
                None => bitmap,
                Some(mut a) => {
                    a.intersect_with(&bitmap);
                    a
                }
            });
        }

        let Some(bitmap) = acc else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(bitmap.cardinality() as usize);
        for id in bitmap.iter() {
            out.push(reader.record(id)?);
        }
        Ok(out)
    }

    /// For each shard, unions the per-key bitmaps and sums the per-key
    /// scores contributed to each posting; keeps the top-`top_k` by summed
    /// score across shards. Ties break by smaller document id, then
    /// smaller shard id (spec.md §4.5).
    pub fn find_sum(&self, keys: &[u64], top_k: usize) -> Result<Vec<R>, ReaderError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self.group_keys_by_shard(keys);
        let per_shard: Vec<Result<Vec<(u32, f32, ShardId)>, ReaderError>> = groups
            .par_iter()
            .map(|(shard, shard_keys)| self.sum_within_shard(*shard, shard_keys))
            .collect();

        let mut all: Vec<(u32, f32, ShardId)> = Vec::new();
        for r in per_shard {
            all.extend(r?);
        }

        all.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
                .then_with(|| a.2.cmp(&b.2))
        });
        all.truncate(top_k);

        let mut out = Vec::with_capacity(all.len());
        for (id, _score, shard) in all {
            let mut reader = self.open_reader(shard)?;
            out.push(reader.record(id)?);
        }
        Ok(out)
    }

    fn sum_within_shard(&self, shard: ShardId, keys: &[u64]) -> Result<Vec<(u32, f32, ShardId)>, ReaderError> {
        let mut reader = match self.open_reader(shard) {
            Ok(r) => r,
            Err(ReaderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut scores: std::collections::BTreeMap<u32, f32> = std::collections::BTreeMap::new();
        for &key in keys {
            let bitmap = reader.find_bitmap(key)?;
            for id in bitmap.iter() {
                let rec = reader.record(id)?;
                *scores.entry(id).or_insert(0.0) += rec.score();
            }
        }

        Ok(scores
            .into_iter()
            .map(|(id, score)| (id, score, shard))
            .collect())
    }

    /// Intersects per-shard as in `find_intersection`, then groups the
    /// resulting records by a caller-supplied key (typically a domain
    /// field), applies `formula(score_sum)` per group, and returns one
    /// record per group (carrying the formula-adjusted score in place of
    /// the original per-posting score). `group_key` extracts the grouping
    /// field from a record; `rebuild` constructs the returned group record
    /// given a representative record and the grouped score.
    pub fn find_group_by<G, F, B>(
        &self,
        keys: &[u64],
        group_key: G,
        formula: F,
        rebuild: B,
        counts_out: &mut Vec<usize>,
    ) -> Result<Vec<R>, ReaderError>
    where
        G: Fn(&R) -> u64,
        F: Fn(f32) -> f32,
        B: Fn(&R, f32) -> R,
    {
        let intersected = self.find_intersection(keys)?;

        let mut groups: std::collections::BTreeMap<u64, (R, f32, usize)> =
            std::collections::BTreeMap::new();
        for rec in &intersected {
            let gk = group_key(rec);
            let entry = groups.entry(gk).or_insert_with(|| (*rec, 0.0, 0));
            entry.1 += rec.score();
            entry.2 += 1;
        }

        counts_out.clear();
        let mut out = Vec::with_capacity(groups.len());
        for (_, (representative, score_sum, count)) in groups {
            counts_out.push(count);
            out.push(rebuild(&representative, formula(score_sum)));
        }
        Ok(out)
    }

    /// Iterates every `(shard, key, bitmap)` triple across the whole index.
    pub fn for_each<FN: FnMut(ShardId, u64, &PostingBitmap)>(&self, mut visit: FN) -> Result<(), ReaderError> {
        for shard_idx in 0..self.num_shards as u32 {
            let shard = ShardId(shard_idx);
            let mut reader = match self.open_reader(shard) {
                Ok(r) => r,
                Err(ReaderError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            reader.for_each(|key, bitmap| visit(shard, key, bitmap))?;
        }
        Ok(())
    }
}
