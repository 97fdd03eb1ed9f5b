//! Byte layout of one shard file and its metadata sidecar.
//!
//! Little-endian fixed-width integers and IEEE-754 floats throughout, per
//! spec.md §4.1. This module owns only the header table and metadata
//! sidecar; page-level encode/decode lives in `page.rs`.

use crate::byte_source::ByteSource;
use crate::config::SIZE_MAX;
use crate::error::ReaderError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};
use std::path::Path;

/// Byte size of the header table for a shard with `hash_table_size` buckets.
pub fn header_byte_size(hash_table_size: usize) -> u64 {
    (hash_table_size as u64) * 8
}

/// Reads `header[bucket]`, returning `None` for an empty bucket.
///
/// `hash_table_size == 0` is a disabled hash table: by convention the
/// reader short-circuits to offset 0, preserving the original's special
/// case (see spec.md §9 open questions).
pub fn read_key_pos<S: ByteSource>(
    source: &mut S,
    hash_table_size: usize,
    key: u64,
) -> Result<Option<u64>, ReaderError> {
    if hash_table_size == 0 {
        return Ok(Some(0));
    }

    let bucket = (key % hash_table_size as u64) as u64;
    source.seek(bucket * 8)?;
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    let pos = u64::from_le_bytes(buf);

    if pos == SIZE_MAX {
        Ok(None)
    } else {
        Ok(Some(pos))
    }
}

/// Writes a full header table, `offsets[i] == SIZE_MAX` for empty buckets.
pub fn write_header<W: Write>(w: &mut W, offsets: &[u64]) -> io::Result<()> {
    for &off in offsets {
        w.write_u64::<LittleEndian>(off)?;
    }
    Ok(())
}

/// The metadata sidecar: a single little-endian `u64` (`unique_count`).
pub fn read_meta_file(path: &Path) -> io::Result<u64> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.len() >= 8 => Ok(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        Ok(_) => Ok(0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Writes the metadata sidecar atomically (write-temp-then-rename), per
/// spec.md §5 "Shared resources".
pub fn write_meta_file_atomic(path: &Path, unique_count: u64) -> io::Result<()> {
    let tmp_path = path.with_extension("meta.tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_u64::<LittleEndian>(unique_count)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads a plain `record_count: u64` header from the record area.
pub fn read_record_count<S: ByteSource>(
    source: &mut S,
    hash_table_size: usize,
) -> Result<u64, ReaderError> {
    source.seek(header_byte_size(hash_table_size))?;
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::FileSource;
    use tempfile::NamedTempFile;

    #[test]
    fn header_round_trip() {
        let file = NamedTempFile::new().unwrap();
        {
            let mut f = std::fs::File::create(file.path()).unwrap();
            let mut offsets = vec![SIZE_MAX; 16];
            offsets[3] = 128;
            write_header(&mut f, &offsets).unwrap();
        }

        let mut src = FileSource::open(file.path()).unwrap();
        assert_eq!(read_key_pos(&mut src, 16, 3).unwrap(), Some(128));
        assert_eq!(read_key_pos(&mut src, 16, 0).unwrap(), None);
    }

    #[test]
    fn disabled_hash_table_short_circuits_to_zero() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0u8; 8]).unwrap();
        let mut src = FileSource::open(file.path()).unwrap();
        assert_eq!(read_key_pos(&mut src, 0, 999).unwrap(), Some(0));
    }

    #[test]
    fn meta_file_round_trips_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.meta");
        write_meta_file_atomic(&path, 12345).unwrap();
        assert_eq!(read_meta_file(&path).unwrap(), 12345);
    }

    #[test]
    fn missing_meta_file_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.meta");
        assert_eq!(read_meta_file(&path).unwrap(), 0);
    }
}
