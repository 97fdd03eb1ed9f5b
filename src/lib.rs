//! Sharded inverted-index storage engine and query planner.
//!
//! A purpose-built binary shard format (fixed-size header hash table,
//! compressed-bitmap postings), a two-phase build pipeline (bounded
//! append + offline merge + optimize), parallel ingestion across shards,
//! and a query-time algebra of AND-intersection, BM25-like summation and
//! domain-level group-by.

pub mod bitmap;
pub mod byte_source;
pub mod codec;
pub mod config;
pub mod error;
pub mod index_manager;
pub mod orchestrator;
pub mod page;
pub mod record;
pub mod shard_builder;
pub mod shard_reader;
pub mod sharded_index;
pub mod tokenizer;
pub mod tsv_dict;

pub use bitmap::PostingBitmap;
pub use error::{BuilderError, QueryError, ReaderError};
pub use index_manager::{IndexManager, QueryResult};
pub use record::{DomainLinkRecord, LinkRecord, Record, WordRecord};
pub use shard_builder::{BuilderConfig, ShardBuilder};
pub use shard_reader::ShardReader;
pub use sharded_index::{ShardId, ShardLayout, ShardedIndex};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
