//! Process-wide constants established at startup and never mutated.
//!
//! Mirrors the teacher crate's free-standing `pub const` items in `lib.rs`
//! (`MAX_BATCH_SIZE`, `DEFAULT_SEGMENT_SIZE`); here they cover hash-table
//! sizing, shard counts, and mount layout instead of batch sizing.

/// Sentinel meaning "bucket empty" in a shard header.
pub const SIZE_MAX: u64 = u64::MAX;

/// Default per-shard hash table size for the word index (small fanout).
pub const WORD_INDEX_SHARD_COUNT: usize = 256;
pub const WORD_INDEX_HASH_TABLE_SIZE: usize = 999_983;

/// Default per-shard hash table size for the link and domain-link indices
/// (large fanout, matching the original deployment's shard count).
pub const LINK_INDEX_SHARD_COUNT: usize = 2001;
pub const DOMAIN_LINK_INDEX_SHARD_COUNT: usize = 2001;
pub const LINK_INDEX_HASH_TABLE_SIZE: usize = 999_983;

/// Default byte budget for one shard builder's in-memory cache (250 MiB).
pub const DEFAULT_BUILDER_BYTE_BUDGET: usize = 250 * 1024 * 1024;

/// Number of pages the merge pass holds in memory at once.
pub const DEFAULT_MERGE_PAGE_BATCH: usize = 4096;

/// Number of independent mount points shard files are spread across.
pub const MOUNT_COUNT: usize = 8;

/// Top-k kept by `find_sum` for the word index's BM25-like summation.
pub const BM25_TOP_K: usize = 1000;

/// Maximum token length (bytes, after trimming) accepted by the tokenizer.
pub const MAX_TOKEN_LEN: usize = 30;

/// TSV binary search linear-scan threshold (bytes).
pub const TSV_LINEAR_SCAN_THRESHOLD: usize = 750;
