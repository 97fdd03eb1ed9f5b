//! Query planner: tokenizes a query, probes the three sharded indices,
//! and combines their results into ranked, per-document hits.
//!
//! Grounded on `original_source/src/indexer/index_manager.cpp`'s `find`
//! method (the exact `bm25`/`links`/`domain_links` three-probe shape and
//! the `domain_formula` closure) and on the teacher's `FtsIndex` for the
//! "one struct bundling the indices a query needs" shape.

use crate::config::{
    BM25_TOP_K, DOMAIN_LINK_INDEX_SHARD_COUNT, LINK_INDEX_HASH_TABLE_SIZE, LINK_INDEX_SHARD_COUNT,
    WORD_INDEX_HASH_TABLE_SIZE, WORD_INDEX_SHARD_COUNT,
};
use crate::error::QueryError;
use crate::record::{DomainLinkRecord, LinkRecord, WordRecord};
use crate::sharded_index::{ShardLayout, ShardedIndex};
use crate::tokenizer::{self, TokenFilter};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

/// A single ranked hit returned by `IndexManager::find`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub doc_id: u64,
    pub score: f32,
}

/// `(exp(25*s) - 1) / 50`, the domain-level aggregation formula from
/// spec.md §4.6. `expm1` isn't in `std`, so this computes it directly;
/// acceptable here since `s` is a bounded, already-summed score rather
/// than a value where cancellation near zero matters.
fn domain_formula(score_sum: f32) -> f32 {
    ((25.0 * score_sum).exp() - 1.0) / 50.0
}

/// Combines the three probe results into one ranked list. The three
/// record families identify documents differently (`doc_id`, `link_hash`,
/// `target_domain`); this crate doesn't own the join between those
/// spaces (URL hashing is an out-of-scope collaborator per spec.md §1),
/// so evidence is accumulated keyed by whichever id field each record
/// family carries, added into one running score per id.
struct LevelEvaluator;

impl LevelEvaluator {
    fn combine(
        bm25: &[WordRecord],
        links: &[LinkRecord],
        domain_links: &[DomainLinkRecord],
    ) -> Vec<QueryResult> {
        let mut scores: BTreeMap<u64, f32> = BTreeMap::new();

        for r in bm25 {
            *scores.entry(r.doc_id).or_insert(0.0) += r.score;
        }
        for r in links {
            *scores.entry(r.link_hash).or_insert(0.0) += r.score;
        }
        for r in domain_links {
            *scores.entry(r.target_domain).or_insert(0.0) += r.score;
        }

        let mut out: Vec<QueryResult> = scores
            .into_iter()
            .map(|(doc_id, score)| QueryResult { doc_id, score })
            .collect();

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        out
    }
}

/// Holds the three sharded indices a query probes: word, link, and
/// domain-link, per spec.md §4.6.
pub struct IndexManager {
    word_index: ShardedIndex<WordRecord>,
    link_index: ShardedIndex<LinkRecord>,
    domain_link_index: ShardedIndex<DomainLinkRecord>,
}

impl IndexManager {
    /// Opens the three indices rooted at `root`, using the default shard
    /// counts and hash-table sizes (spec.md §4.6: word index small-fanout,
    /// link and domain-link indices large-fanout).
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            word_index: ShardedIndex::new(
                ShardLayout::new(root, "word_index"),
                WORD_INDEX_SHARD_COUNT,
                WORD_INDEX_HASH_TABLE_SIZE,
            ),
            link_index: ShardedIndex::new(
                ShardLayout::new(root, "link_index"),
                LINK_INDEX_SHARD_COUNT,
                LINK_INDEX_HASH_TABLE_SIZE,
            ),
            domain_link_index: ShardedIndex::new(
                ShardLayout::new(root, "domain_link_index"),
                DOMAIN_LINK_INDEX_SHARD_COUNT,
                LINK_INDEX_HASH_TABLE_SIZE,
            ),
        }
    }

    /// Runs the full query algorithm from spec.md §4.6: tokenize, probe
    /// the three indices, combine, sort by descending score (ties by
    /// ascending document id).
    pub fn find(&self, query: &str) -> Result<Vec<QueryResult>, QueryError> {
        let tokens = tokenizer::tokenize_hashed(query, TokenFilter::AlphanumericOnly);
        if tokens.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let bm25 = self.word_index.find_sum(&tokens, BM25_TOP_K)?;
        let links = self.link_index.find_intersection(&tokens)?;

        let mut counts = Vec::new();
        let domain_links = self.domain_link_index.find_group_by(
            &tokens,
            |r: &DomainLinkRecord| r.target_domain,
            domain_formula,
            |representative: &DomainLinkRecord, score| DomainLinkRecord {
                score,
                ..*representative
            },
            &mut counts,
        )?;

        Ok(LevelEvaluator::combine(&bm25, &links, &domain_links))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard_builder::{BuilderConfig, ShardBuilder};
    use crate::sharded_index::ShardId;

    fn build_word_shard(layout: &ShardLayout, shard: ShardId, inserts: &[(u64, WordRecord)]) {
        let mut builder: ShardBuilder<WordRecord> = ShardBuilder::new(
            shard,
            layout.data_path(shard),
            layout.meta_path(shard),
            layout.append_log_path(shard),
            64,
            BuilderConfig::default(),
        );
        for &(key, rec) in inserts {
            builder.add(key, rec).unwrap();
        }
        builder.append().unwrap();
        builder.merge().unwrap();
    }

    #[test]
    fn find_ranks_by_descending_score_with_ascending_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), "word_index");
        layout.ensure_directories(WORD_INDEX_SHARD_COUNT).unwrap();

        let key = tokenizer::fnv1a(b"apple");
        let shard = ShardId((key % WORD_INDEX_SHARD_COUNT as u64) as u32);
        build_word_shard(
            &layout,
            shard,
            &[
                (key, WordRecord::new(10, 0.1)),
                (key, WordRecord::new(20, 0.9)),
                (key, WordRecord::new(30, 0.9)),
            ],
        );

        let manager = IndexManager {
            word_index: ShardedIndex::new(layout, WORD_INDEX_SHARD_COUNT, 64),
            link_index: ShardedIndex::new(
                ShardLayout::new(dir.path(), "link_index"),
                LINK_INDEX_SHARD_COUNT,
                LINK_INDEX_HASH_TABLE_SIZE,
            ),
            domain_link_index: ShardedIndex::new(
                ShardLayout::new(dir.path(), "domain_link_index"),
                DOMAIN_LINK_INDEX_SHARD_COUNT,
                LINK_INDEX_HASH_TABLE_SIZE,
            ),
        };

        let results = manager.find("apple").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].doc_id, 20);
        assert_eq!(results[1].doc_id, 30);
        assert_eq!(results[2].doc_id, 10);
    }

    #[test]
    fn empty_query_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::open(dir.path());
        assert!(matches!(manager.find("   "), Err(QueryError::EmptyQuery)));
    }

    #[test]
    fn domain_formula_matches_scenario_six() {
        let got = domain_formula(0.3);
        let want = ((25.0f32 * 0.3).exp() - 1.0) / 50.0;
        assert!((got - want).abs() < 1e-6);
    }
}
