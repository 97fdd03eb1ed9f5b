//! Fixed-size, plain-data record types stored in the page area of a shard.
//!
//! Each record family implements `Record` so that the codec, reader and
//! builder are written once and monomorphized per family, the idiomatic
//! Rust stand-in for the original's C++ `index<data_record>` template.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A fixed-size record with a natural total order (primary key, then score).
pub trait Record: Sized + Copy + Clone + PartialEq + PartialOrd {
    /// Encoded size in bytes. Must be constant across all instances.
    const SIZE: usize;

    /// The field new document ids are assigned against (the "primary key").
    fn primary_key(&self) -> u64;

    fn score(&self) -> f32;

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self>;
    fn write_le<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

/// Word-index posting: a document and the BM25-like score contributed by
/// one term in that document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordRecord {
    pub doc_id: u64,
    pub score: f32,
}

impl WordRecord {
    pub fn new(doc_id: u64, score: f32) -> Self {
        Self { doc_id, score }
    }
}

impl PartialOrd for WordRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        (self.doc_id, OrderedF32(self.score)).partial_cmp(&(other.doc_id, OrderedF32(other.score)))
    }
}

impl Record for WordRecord {
    const SIZE: usize = 8 + 4;

    fn primary_key(&self) -> u64 {
        self.doc_id
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        let doc_id = r.read_u64::<LittleEndian>()?;
        let score = r.read_f32::<LittleEndian>()?;
        Ok(Self { doc_id, score })
    }

    fn write_le<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.doc_id)?;
        w.write_f32::<LittleEndian>(self.score)?;
        Ok(())
    }
}

/// Link-index posting: one crawled hyperlink, carrying the source domain
/// and target-url hash used for url-level evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkRecord {
    pub link_hash: u64,
    pub score: f32,
    pub source_domain: u64,
    pub target_hash: u64,
}

impl LinkRecord {
    pub fn new(link_hash: u64, score: f32, source_domain: u64, target_hash: u64) -> Self {
        Self {
            link_hash,
            score,
            source_domain,
            target_hash,
        }
    }
}

impl PartialOrd for LinkRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        (self.link_hash, OrderedF32(self.score))
            .partial_cmp(&(other.link_hash, OrderedF32(other.score)))
    }
}

impl Record for LinkRecord {
    const SIZE: usize = 8 + 4 + 8 + 8;

    fn primary_key(&self) -> u64 {
        self.link_hash
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        let link_hash = r.read_u64::<LittleEndian>()?;
        let score = r.read_f32::<LittleEndian>()?;
        let source_domain = r.read_u64::<LittleEndian>()?;
        let target_hash = r.read_u64::<LittleEndian>()?;
        Ok(Self {
            link_hash,
            score,
            source_domain,
            target_hash,
        })
    }

    fn write_le<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.link_hash)?;
        w.write_f32::<LittleEndian>(self.score)?;
        w.write_u64::<LittleEndian>(self.source_domain)?;
        w.write_u64::<LittleEndian>(self.target_hash)?;
        Ok(())
    }
}

/// Domain-link-index posting: the domain-level aggregate of a hyperlink,
/// carrying both endpoints' domains instead of the target url hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainLinkRecord {
    pub link_hash: u64,
    pub score: f32,
    pub source_domain: u64,
    pub target_domain: u64,
}

impl DomainLinkRecord {
    pub fn new(link_hash: u64, score: f32, source_domain: u64, target_domain: u64) -> Self {
        Self {
            link_hash,
            score,
            source_domain,
            target_domain,
        }
    }
}

impl PartialOrd for DomainLinkRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        (self.link_hash, OrderedF32(self.score))
            .partial_cmp(&(other.link_hash, OrderedF32(other.score)))
    }
}

impl Record for DomainLinkRecord {
    const SIZE: usize = 8 + 4 + 8 + 8;

    fn primary_key(&self) -> u64 {
        self.link_hash
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn read_le<R: Read>(r: &mut R) -> io::Result<Self> {
        let link_hash = r.read_u64::<LittleEndian>()?;
        let score = r.read_f32::<LittleEndian>()?;
        let source_domain = r.read_u64::<LittleEndian>()?;
        let target_domain = r.read_u64::<LittleEndian>()?;
        Ok(Self {
            link_hash,
            score,
            source_domain,
            target_domain,
        })
    }

    fn write_le<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.link_hash)?;
        w.write_f32::<LittleEndian>(self.score)?;
        w.write_u64::<LittleEndian>(self.source_domain)?;
        w.write_u64::<LittleEndian>(self.target_domain)?;
        Ok(())
    }
}

/// Total order helper: `f32` has no `Ord`, but stored scores are never NaN,
/// so we fall back to `Equal` rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedF32(f32);

impl PartialOrd for OrderedF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0).or(Some(std::cmp::Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn word_record_round_trips() {
        let rec = WordRecord::new(42, 0.5);
        let mut buf = Vec::new();
        rec.write_le(&mut buf).unwrap();
        assert_eq!(buf.len(), WordRecord::SIZE);
        let back = WordRecord::read_le(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn link_record_round_trips() {
        let rec = LinkRecord::new(1, 0.25, 2, 3);
        let mut buf = Vec::new();
        rec.write_le(&mut buf).unwrap();
        assert_eq!(buf.len(), LinkRecord::SIZE);
        let back = LinkRecord::read_le(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn word_records_sort_by_doc_id_then_score() {
        let mut v = vec![
            WordRecord::new(2, 1.0),
            WordRecord::new(1, 5.0),
            WordRecord::new(1, 0.1),
        ];
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(v[0].doc_id, 1);
        assert!(v[0].score < v[1].score);
        assert_eq!(v[2].doc_id, 2);
    }
}
