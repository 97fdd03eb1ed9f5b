//! Compressed posting bitmap: a set of document ids attached to one key.
//!
//! Wraps `roaring::RoaringBitmap` (the teacher's bitmap of choice, see
//! `profiles/roaring_bm25.rs`) behind the narrow surface spec.md §4.2
//! requires, so corrupt/untrusted bytes can never reach a panic.

use roaring::RoaringBitmap;
use std::io;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingBitmap(RoaringBitmap);

impl PostingBitmap {
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    /// Idempotent: adding an id already present is a no-op.
    pub fn add(&mut self, doc_id: u32) {
        self.0.insert(doc_id);
    }

    pub fn union_with(&mut self, other: &PostingBitmap) {
        self.0 |= &other.0;
    }

    pub fn intersect_with(&mut self, other: &PostingBitmap) {
        self.0 &= &other.0;
    }

    pub fn cardinality(&self) -> u64 {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Forward iterate ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter()
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        self.0.serialize_into(out)
    }

    pub fn serialized_size(&self) -> usize {
        self.0.serialized_size()
    }

    /// Safely deserialize from untrusted bytes: never panics, returns an
    /// error on malformed input instead of undefined behavior.
    pub fn try_deserialize(bytes: &[u8]) -> io::Result<Self> {
        RoaringBitmap::deserialize_from(bytes).map(Self)
    }
}

impl FromIterator<u32> for PostingBitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(RoaringBitmap::from_iter(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut b = PostingBitmap::new();
        b.add(5);
        b.add(5);
        assert_eq!(b.cardinality(), 1);
    }

    #[test]
    fn union_and_intersection() {
        let a: PostingBitmap = [1, 2, 3].into_iter().collect();
        let b: PostingBitmap = [2, 3, 4].into_iter().collect();

        let mut u = a.clone();
        u.union_with(&b);
        assert_eq!(u.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let mut i = a.clone();
        i.intersect_with(&b);
        assert_eq!(i.iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn round_trips_through_bytes() {
        let b: PostingBitmap = [10, 20, 30, 1_000_000].into_iter().collect();
        let mut bytes = Vec::new();
        b.serialize_to(&mut bytes).unwrap();
        let back = PostingBitmap::try_deserialize(&bytes).unwrap();
        assert_eq!(b, back);
    }

    #[test]
    fn corrupt_bytes_error_not_panic() {
        let garbage = vec![0xffu8; 37];
        let result = PostingBitmap::try_deserialize(&garbage);
        assert!(result.is_err());
    }

    #[test]
    fn fuzz_random_bytes_never_panics() {
        // Deterministic pseudo-random fuzz without pulling in a `rand`
        // dependency: a small xorshift is enough to vary the corpus.
        let mut state: u64 = 0x9e3779b97f4a7c15;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let len = (state % 64) as usize;
            let bytes: Vec<u8> = (0..len).map(|i| ((state >> (i % 8)) & 0xff) as u8).collect();
            let _ = PostingBitmap::try_deserialize(&bytes);
        }
    }
}
