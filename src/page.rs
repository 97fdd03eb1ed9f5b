//! Page format: a hash-table bucket's payload — one or more keys sharing a
//! bucket, their posting bitmaps, laid out per spec.md §3/§6:
//!
//! ```text
//! num_keys: u64
//! keys:     u64 * num_keys
//! pos:      u64 * num_keys   (offset into this page's data area)
//! len:      u64 * num_keys   (byte length of the bitmap at that offset)
//! data:     concatenated bitmaps
//! ```
//!
//! `pos[i]` is measured from `page_start + 8 + 3*num_keys*8`. Grounded on
//! `original_source/src/indexer/index.h`'s `find_bitmap`, which performs
//! exactly this seek arithmetic.

use crate::bitmap::PostingBitmap;
use crate::byte_source::ByteSource;
use crate::config::SIZE_MAX;
use crate::error::ReaderError;
use crate::sharded_index::ShardId;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use std::path::Path;

/// One key's bitmap, staged for serialization into a page.
pub struct PageEntry {
    pub key: u64,
    pub bitmap: PostingBitmap,
}

/// Serializes a sorted set of `(key, bitmap)` pairs sharing one bucket into
/// the page byte layout described above.
pub fn write_page<W: Write>(w: &mut W, entries: &[PageEntry]) -> io::Result<()> {
    let num_keys = entries.len() as u64;
    w.write_u64::<LittleEndian>(num_keys)?;

    for e in entries {
        w.write_u64::<LittleEndian>(e.key)?;
    }

    let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(entries.len());
    let mut pos = 0u64;
    let mut positions = Vec::with_capacity(entries.len());
    let mut lengths = Vec::with_capacity(entries.len());
    for e in entries {
        let mut buf = Vec::new();
        e.bitmap
            .serialize_to(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        positions.push(pos);
        lengths.push(buf.len() as u64);
        pos += buf.len() as u64;
        payloads.push(buf);
    }

    for &p in &positions {
        w.write_u64::<LittleEndian>(p)?;
    }
    for &l in &lengths {
        w.write_u64::<LittleEndian>(l)?;
    }
    for payload in &payloads {
        w.write_all(payload)?;
    }

    Ok(())
}

/// Byte length of a page's fixed-size part (everything before `data`).
pub fn page_header_len(num_keys: u64) -> u64 {
    8 + 3 * num_keys * 8
}

/// Reads the bitmap for `key` out of the page at `page_start`, implementing
/// the linear-scan-within-bucket lookup contract from spec.md §4.1.
/// Returns `Ok(None)` if `key` is not present in this page (should not
/// normally happen for a `page_start` obtained via `read_key_pos`, but a
/// hash collision across differently-routed callers is handled gracefully).
pub fn read_bitmap_at<S: ByteSource>(
    source: &mut S,
    shard: ShardId,
    path: &Path,
    page_start: u64,
    key: u64,
) -> Result<Option<PostingBitmap>, ReaderError> {
    source.seek(page_start).map_err(ReaderError::Io)?;
    let mut buf8 = [0u8; 8];
    source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
    let num_keys = u64::from_le_bytes(buf8);

    if num_keys > 1_000_000 {
        log::warn!(
            "shard {shard}: implausible num_keys {num_keys} at offset {page_start} in {}",
            path.display()
        );
        return Err(ReaderError::CorruptFormat {
            shard,
            path: path.to_path_buf(),
            offset: Some(page_start),
            detail: format!("implausible num_keys {num_keys} in page"),
        });
    }

    let mut keys = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
        keys.push(u64::from_le_bytes(buf8));
    }

    let Some(index) = keys.iter().position(|&k| k == key) else {
        return Ok(None);
    };

    source
        .seek(page_start + 8 + num_keys * 8 + index as u64 * 8)
        .map_err(ReaderError::Io)?;
    source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
    let pos = u64::from_le_bytes(buf8);

    source
        .seek(page_start + 8 + 2 * num_keys * 8 + index as u64 * 8)
        .map_err(ReaderError::Io)?;
    source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
    let len = u64::from_le_bytes(buf8);

    let data_base = page_start + page_header_len(num_keys);
    source.seek(data_base + pos).map_err(ReaderError::Io)?;
    let mut data = vec![0u8; len as usize];
    source.read_exact(&mut data).map_err(ReaderError::Io)?;

    let bitmap = PostingBitmap::try_deserialize(&data).map_err(|e| {
        log::warn!(
            "shard {shard}: corrupt bitmap for key {key} at offset {} in {}: {e}",
            data_base + pos,
            path.display()
        );
        ReaderError::CorruptFormat {
            shard,
            path: path.to_path_buf(),
            offset: Some(data_base + pos),
            detail: format!("bitmap deserialization failed: {e}"),
        }
    })?;

    Ok(Some(bitmap))
}

/// Streams every `(key, bitmap)` pair out of the page at `page_start`, in
/// page order, used by `for_each`.
pub fn read_all_in_page<S: ByteSource>(
    source: &mut S,
    shard: ShardId,
    path: &Path,
    page_start: u64,
) -> Result<Vec<(u64, PostingBitmap)>, ReaderError> {
    source.seek(page_start).map_err(ReaderError::Io)?;
    let mut buf8 = [0u8; 8];
    source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
    let num_keys = u64::from_le_bytes(buf8);

    let mut keys = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
        keys.push(u64::from_le_bytes(buf8));
    }

    let mut positions = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
        positions.push(u64::from_le_bytes(buf8));
    }

    let mut lengths = Vec::with_capacity(num_keys as usize);
    for _ in 0..num_keys {
        source.read_exact(&mut buf8).map_err(ReaderError::Io)?;
        lengths.push(u64::from_le_bytes(buf8));
    }

    let data_base = page_start + page_header_len(num_keys);
    let mut out = Vec::with_capacity(num_keys as usize);
    for i in 0..num_keys as usize {
        source
            .seek(data_base + positions[i])
            .map_err(ReaderError::Io)?;
        let mut data = vec![0u8; lengths[i] as usize];
        source.read_exact(&mut data).map_err(ReaderError::Io)?;
        let bitmap = PostingBitmap::try_deserialize(&data).map_err(|e| ReaderError::CorruptFormat {
            shard,
            path: path.to_path_buf(),
            offset: Some(data_base + positions[i]),
            detail: format!("bitmap deserialization failed: {e}"),
        })?;
        out.push((keys[i], bitmap));
    }

    Ok(out)
}

/// Total byte length of a serialized page (header + data).
pub fn page_byte_len(entries: &[PageEntry]) -> u64 {
    let num_keys = entries.len() as u64;
    page_header_len(num_keys) + entries.iter().map(|e| e.bitmap.serialized_size() as u64).sum::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::FileSource;

    fn bitmap(ids: &[u32]) -> PostingBitmap {
        ids.iter().copied().collect()
    }

    #[test]
    fn write_then_read_single_key_page() {
        let entries = vec![PageEntry {
            key: 777,
            bitmap: bitmap(&[1, 2, 3]),
        }];

        let mut buf = Vec::new();
        write_page(&mut buf, &entries).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.bin");
        std::fs::write(&path, &buf).unwrap();

        let mut src = FileSource::open(&path).unwrap();
        let found = read_bitmap_at(&mut src, ShardId(0), &path, 0, 777)
            .unwrap()
            .unwrap();
        assert_eq!(found.iter().collect::<Vec<_>>(), vec![1, 2, 3]);

        let mut src = FileSource::open(&path).unwrap();
        let missing = read_bitmap_at(&mut src, ShardId(0), &path, 0, 999).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn write_then_read_multi_key_page_linear_scan() {
        let entries = vec![
            PageEntry {
                key: 10,
                bitmap: bitmap(&[1]),
            },
            PageEntry {
                key: 20,
                bitmap: bitmap(&[2, 3]),
            },
            PageEntry {
                key: 30,
                bitmap: bitmap(&[4, 5, 6]),
            },
        ];

        let mut buf = Vec::new();
        write_page(&mut buf, &entries).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.bin");
        std::fs::write(&path, &buf).unwrap();

        for (key, expected) in [(10u64, vec![1u32]), (20, vec![2, 3]), (30, vec![4, 5, 6])] {
            let mut src = FileSource::open(&path).unwrap();
            let found = read_bitmap_at(&mut src, ShardId(0), &path, 0, key)
                .unwrap()
                .unwrap();
            assert_eq!(found.iter().collect::<Vec<_>>(), expected);
        }

        let mut src = FileSource::open(&path).unwrap();
        let all = read_all_in_page(&mut src, ShardId(0), &path, 0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].0, 20);
    }
}
