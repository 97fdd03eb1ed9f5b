//! Pluggable byte-source abstraction behind the shard reader.
//!
//! The only dynamic-dispatch boundary in this crate (spec.md §9): a
//! capability set of `{seek, read, size}` with two variants, file-backed
//! and memory-mapped. Grounded on the teacher's use of `memmap2` (declared
//! but unused in the retrieved subset) and on `FtsIndex::open`'s
//! file-handle ownership pattern in `index.rs`.

use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Capability set required by `ShardReader`: seek, read, and report size.
/// Safe for concurrent readers once a shard is finalized (spec.md §5).
pub trait ByteSource {
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File-handle backed byte source: a direct-seek `File`, no buffering,
/// since random access defeats a `BufReader`'s read-ahead.
pub struct FileSource {
    file: File,
    len: u64,
    path: PathBuf,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(&mut self.file, buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Memory-mapped byte source: zero-copy random access, safe for
/// concurrent readers because the map is immutable once a shard is
/// finalized.
pub struct MmapSource {
    mmap: Mmap,
    cursor: u64,
}

impl MmapSource {
    /// # Safety contract
    /// The caller must guarantee the underlying file is not mutated while
    /// mapped; finalized shard files satisfy this (spec.md §5).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap, cursor: 0 })
    }
}

impl ByteSource for MmapSource {
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.cursor = pos;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let start = self.cursor as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of mmap"))?;
        if end > self.mmap.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of mmap"));
        }
        buf.copy_from_slice(&self.mmap[start..end]);
        self.cursor = end as u64;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_reads_what_was_written() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();

        let mut src = FileSource::open(tmp.path()).unwrap();
        src.seek(6).unwrap();
        let mut buf = [0u8; 5];
        src.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(src.len(), 11);
    }

    #[test]
    fn mmap_source_reads_what_was_written() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        tmp.write_all(b"hello world").unwrap();
        tmp.flush().unwrap();

        let mut src = MmapSource::open(tmp.path()).unwrap();
        src.seek(0).unwrap();
        let mut buf = [0u8; 5];
        src.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mmap_source_rejects_out_of_range_read() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        tmp.write_all(b"short").unwrap();
        tmp.flush().unwrap();

        let mut src = MmapSource::open(tmp.path()).unwrap();
        src.seek(0).unwrap();
        let mut buf = [0u8; 100];
        assert!(src.read_exact(&mut buf).is_err());
    }
}
