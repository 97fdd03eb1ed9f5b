//! Error kinds shared across the codec, builder, reader and query layers.
//!
//! Mirrors the split the original index drew between silent empty-result
//! returns (absent key) and typed errors (malformed input, I/O failure).

use std::path::PathBuf;

use crate::sharded_index::ShardId;

/// Errors that can surface while reading a finalized shard.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt shard format in {path:?} (shard {shard}) at offset {offset:?}: {detail}")]
    CorruptFormat {
        shard: ShardId,
        path: PathBuf,
        offset: Option<u64>,
        detail: String,
    },

    #[error("shard {shard} not found at {path:?}")]
    NotFound { shard: ShardId, path: PathBuf },
}

/// Errors that can surface while building or merging a shard.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt append log {path:?} for shard {shard} at byte offset {offset}: {detail}")]
    CorruptAppendLog {
        shard: ShardId,
        path: PathBuf,
        offset: u64,
        detail: String,
    },

    /// Soft signal: the in-memory cache exceeded its byte budget. Not fatal,
    /// it tells the caller to flush now.
    #[error("shard {shard} builder cache exceeded its byte budget ({used} > {budget} bytes)")]
    BudgetExceeded {
        shard: ShardId,
        used: usize,
        budget: usize,
    },

    #[error("internal invariant violated in shard {shard}: {detail}")]
    InvariantViolation { shard: ShardId, detail: String },
}

/// Errors surfaced by the top-level query planner.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("empty query after tokenization")]
    EmptyQuery,
}
