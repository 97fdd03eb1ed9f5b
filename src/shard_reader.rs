//! Random-access key lookup over one finalized shard file.
//!
//! Grounded on `original_source/src/indexer/index.h`'s `index<data_record>`
//! (the `find`, `find_bitmap`, `get_idf`, `for_each` methods) and on the
//! teacher's `FtsIndex::open`/`profiles/roaring_bm25.rs::load` for the
//! general shape of "open a handle, read the header, answer lookups".

use crate::bitmap::PostingBitmap;
use crate::byte_source::{ByteSource, FileSource, MmapSource};
use crate::codec;
use crate::error::ReaderError;
use crate::page;
use crate::record::Record;
use crate::sharded_index::ShardId;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Reads a finalized, read-only shard file plus its metadata sidecar.
pub struct ShardReader<S: ByteSource, R: Record> {
    source: S,
    path: PathBuf,
    shard: ShardId,
    hash_table_size: usize,
    unique_count: u64,
    _record: PhantomData<R>,
}

impl<R: Record> ShardReader<FileSource, R> {
    pub fn open_file(
        shard: ShardId,
        data_path: impl AsRef<Path>,
        meta_path: impl AsRef<Path>,
        hash_table_size: usize,
    ) -> Result<Self, ReaderError> {
        let data_path = data_path.as_ref();
        let source = FileSource::open(data_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReaderError::NotFound {
                    shard,
                    path: data_path.to_path_buf(),
                }
            } else {
                ReaderError::Io(e)
            }
        })?;
        let unique_count = codec::read_meta_file(meta_path.as_ref())?;
        Ok(Self {
            source,
            path: data_path.to_path_buf(),
            shard,
            hash_table_size,
            unique_count,
            _record: PhantomData,
        })
    }
}

impl<R: Record> ShardReader<MmapSource, R> {
    pub fn open_mmap(
        shard: ShardId,
        data_path: impl AsRef<Path>,
        meta_path: impl AsRef<Path>,
        hash_table_size: usize,
    ) -> Result<Self, ReaderError> {
        let data_path = data_path.as_ref();
        let source = MmapSource::open(data_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReaderError::NotFound {
                    shard,
                    path: data_path.to_path_buf(),
                }
            } else {
                ReaderError::Io(e)
            }
        })?;
        let unique_count = codec::read_meta_file(meta_path.as_ref())?;
        Ok(Self {
            source,
            path: data_path.to_path_buf(),
            shard,
            hash_table_size,
            unique_count,
            _record: PhantomData,
        })
    }
}

impl<S: ByteSource, R: Record> ShardReader<S, R> {
    /// Returns the posting bitmap for `key`, or empty if absent. Absent
    /// keys are never an error (spec.md §4.3).
    pub fn find_bitmap(&mut self, key: u64) -> Result<PostingBitmap, ReaderError> {
        let Some(page_start) = codec::read_key_pos(&mut self.source, self.hash_table_size, key)?
        else {
            return Ok(PostingBitmap::new());
        };

        match page::read_bitmap_at(&mut self.source, self.shard, &self.path, page_start, key)? {
            Some(bitmap) => Ok(bitmap),
            None => Ok(PostingBitmap::new()),
        }
    }

    /// Returns the records for the ids in `key`'s bitmap, ascending id order.
    pub fn find(&mut self, key: u64) -> Result<Vec<R>, ReaderError> {
        let bitmap = self.find_bitmap(key)?;
        let mut out = Vec::with_capacity(bitmap.cardinality() as usize);
        for id in bitmap.iter() {
            out.push(self.record(id)?);
        }
        Ok(out)
    }

    /// Direct record fetch by internal document id.
    pub fn record(&mut self, id: u32) -> Result<R, ReaderError> {
        let base = codec::header_byte_size(self.hash_table_size) + 8;
        self.source
            .seek(base + id as u64 * R::SIZE as u64)
            .map_err(ReaderError::Io)?;
        let mut buf = vec![0u8; R::SIZE];
        self.source.read_exact(&mut buf).map_err(ReaderError::Io)?;
        R::read_le(&mut &buf[..]).map_err(|e| ReaderError::CorruptFormat {
            shard: self.shard,
            path: self.path.clone(),
            offset: Some(base + id as u64 * R::SIZE as u64),
            detail: format!("record decode failed: {e}"),
        })
    }

    /// Streams `(key, bitmap)` pairs over the whole shard in page order.
    pub fn for_each<F: FnMut(u64, &PostingBitmap)>(&mut self, mut visit: F) -> Result<(), ReaderError> {
        for bucket in 0..self.hash_table_size as u64 {
            self.source.seek(bucket * 8).map_err(ReaderError::Io)?;
            let mut buf = [0u8; 8];
            self.source.read_exact(&mut buf).map_err(ReaderError::Io)?;
            let page_start = u64::from_le_bytes(buf);
            if page_start == crate::config::SIZE_MAX {
                continue;
            }
            let pairs =
                page::read_all_in_page(&mut self.source, self.shard, &self.path, page_start)?;
            for (key, bitmap) in &pairs {
                visit(*key, bitmap);
            }
        }
        Ok(())
    }

    /// `ln(unique_count / documents_with_term)` when `documents_with_term >
    /// 0`, else `0`.
    pub fn idf(&self, documents_with_term: u64) -> f32 {
        if documents_with_term == 0 {
            return 0.0;
        }
        (self.unique_count as f32 / documents_with_term as f32).ln()
    }

    pub fn unique_count(&self) -> u64 {
        self.unique_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::WordRecord;
    use crate::shard_builder::{BuilderConfig, ShardBuilder};
    use crate::sharded_index::ShardId;

    #[test]
    fn idf_is_zero_for_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder: ShardBuilder<WordRecord> = ShardBuilder::new(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            dir.path().join("0.append"),
            128,
            BuilderConfig::default(),
        );
        builder.add(1, WordRecord::new(1, 1.0)).unwrap();
        builder.append().unwrap();
        builder.merge().unwrap();

        let reader: ShardReader<FileSource, WordRecord> = ShardReader::open_file(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            128,
        )
        .unwrap();
        assert_eq!(reader.idf(0), 0.0);
    }

    #[test]
    fn idf_monotonicity_for_fixed_unique_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder: ShardBuilder<WordRecord> = ShardBuilder::new(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            dir.path().join("0.append"),
            128,
            BuilderConfig::default(),
        );
        for doc in 0..10u64 {
            builder.add(1, WordRecord::new(doc, 1.0)).unwrap();
        }
        builder.append().unwrap();
        builder.merge().unwrap();

        let reader: ShardReader<FileSource, WordRecord> = ShardReader::open_file(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            128,
        )
        .unwrap();
        assert!(reader.idf(2) > reader.idf(5));
        assert!(reader.idf(5) > reader.idf(10));
    }

    #[test]
    fn open_mmap_reads_back_the_same_records_as_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder: ShardBuilder<WordRecord> = ShardBuilder::new(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            dir.path().join("0.append"),
            128,
            BuilderConfig::default(),
        );
        builder.add(42, WordRecord::new(7, 2.5)).unwrap();
        builder.append().unwrap();
        builder.merge().unwrap();

        let mut reader: ShardReader<MmapSource, WordRecord> = ShardReader::open_mmap(
            ShardId(0),
            dir.path().join("0.data"),
            dir.path().join("0.meta"),
            128,
        )
        .unwrap();
        let found = reader.find(42).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].doc_id, 7);
    }
}
