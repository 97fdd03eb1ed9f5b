//! Byte-in/hash-out tokenizer contract shared by build and query time.
//!
//! Splitting, trimming and the alphanumeric/full-text/stopwords variants
//! are grounded on `original_source/src/abstract/TextBase.h`'s
//! `get_words`/`get_full_text_words`/`get_words_without_stopwords`
//! (Swedish-alphabet `å`/`ä`/`ö` handling included). Hashing is FNV-1a,
//! grounded on the teacher's `profiles/ultra.rs` — chosen over the
//! teacher's default `ahash`/`rustc-hash` because neither carries the
//! determinism the crate's contract promises ("the hash must not depend
//! on process state").

use crate::config::MAX_TOKEN_LEN;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

const WORD_BOUNDARY: [u8; 5] = [b' ', b'\t', b',', b'|', b'!'];

/// A small, fixed English stopword list. Concrete rather than
/// configurable: the contract only asks for "a fixed stopword set".
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "in", "on", "to", "is", "it", "for", "with", "as", "by",
    "at", "be", "this", "that",
];

/// Which characters a surviving token is allowed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFilter {
    /// `[a-z0-9]` plus `å`, `ä`, `ö`; any other character in the token
    /// rejects the whole token (not a per-character filter).
    AlphanumericOnly,
    /// Any non-empty, valid UTF-8 token.
    FullText,
    /// Same as `AlphanumericOnly`, plus a fixed stopword rejection.
    AlphanumericWithoutStopwords,
}

/// Splits `text` on the word-boundary byte set, lowercases, trims leading
/// and trailing whitespace/punctuation, drops anything empty or longer
/// than `MAX_TOKEN_LEN` bytes after trimming, then applies `filter`.
pub fn tokenize(text: &str, filter: TokenFilter) -> Vec<String> {
    let lowered = text.to_lowercase();

    lowered
        .split(|c: char| c.is_ascii() && WORD_BOUNDARY.contains(&(c as u8)))
        .filter_map(|raw| {
            let trimmed = trim_punct_and_space(raw);
            if trimmed.is_empty() || trimmed.len() > MAX_TOKEN_LEN {
                return None;
            }
            match filter {
                TokenFilter::AlphanumericOnly => {
                    is_clean_word(trimmed).then(|| trimmed.to_string())
                }
                TokenFilter::FullText => Some(trimmed.to_string()),
                TokenFilter::AlphanumericWithoutStopwords => {
                    if is_clean_word(trimmed) && !is_stopword(trimmed) {
                        Some(trimmed.to_string())
                    } else {
                        None
                    }
                }
            }
        })
        .collect()
}

/// Tokenizes and hashes in one pass, the function actually called at
/// build and query time (spec.md §4.7).
pub fn tokenize_hashed(text: &str, filter: TokenFilter) -> Vec<u64> {
    tokenize(text, filter).iter().map(|t| fnv1a(t.as_bytes())).collect()
}

fn trim_punct_and_space(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '_'))
}

/// A char is clean if it is `[a-z0-9]` or one of `å`, `ä`, `ö`.
fn is_clean_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | 'å' | 'ä' | 'ö')
}

/// A word is clean only if every character in it is clean; one dirty
/// character rejects the whole token, mirroring `TextBase::is_clean_word`
/// rather than `TextBase::clean_word` (which would filter in place).
fn is_clean_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_clean_char)
}

fn is_stopword(s: &str) -> bool {
    STOPWORDS.contains(&s)
}

/// Stable 64-bit FNV-1a hash. Carries no seed or process-derived state,
/// so it produces the same value across build and query processes.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_exact_separator_set() {
        let words = tokenize("red,car|runs fast!quick", TokenFilter::FullText);
        assert_eq!(words, vec!["red", "car", "runs", "fast", "quick"]);
    }

    #[test]
    fn alphanumeric_only_rejects_whole_token_on_dirty_char() {
        let words = tokenize("hello, wo!rld caf\u{e9}", TokenFilter::AlphanumericOnly);
        // "caf\u{e9}" (e with acute) is dirty and rejected outright.
        assert_eq!(words, vec!["hello", "wo", "rld"]);
    }

    #[test]
    fn alphanumeric_only_accepts_swedish_letters() {
        let words = tokenize("röd bil", TokenFilter::AlphanumericOnly);
        assert_eq!(words, vec!["röd", "bil"]);
    }

    #[test]
    fn rejects_tokens_longer_than_cap() {
        let long = "a".repeat(31);
        let words = tokenize(&long, TokenFilter::FullText);
        assert!(words.is_empty());
    }

    #[test]
    fn stopwords_variant_drops_fixed_list() {
        let words = tokenize("the red car is fast", TokenFilter::AlphanumericWithoutStopwords);
        assert_eq!(words, vec!["red", "car", "fast"]);
    }

    #[test]
    fn full_text_keeps_tokens_alphanumeric_only_would_reject() {
        let words = tokenize("café racing", TokenFilter::FullText);
        assert_eq!(words, vec!["café", "racing"]);
        assert!(tokenize("café racing", TokenFilter::AlphanumericOnly)
            .iter()
            .all(|w| w != "café"));
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let a = fnv1a(b"hello");
        let b = fnv1a(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, fnv1a(b"world"));
    }

    #[test]
    fn tokenize_idempotent_on_already_tokenized_input() {
        let once = tokenize("Red Car Fast", TokenFilter::AlphanumericOnly);
        let rejoined = once.join(" ");
        let twice = tokenize(&rejoined, TokenFilter::AlphanumericOnly);
        assert_eq!(once, twice);
    }
}
