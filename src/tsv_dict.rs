//! Sorted TSV dictionary probe: a read-only, lexicographically
//! key-sorted, tab-separated file, searched by interpolation-free binary
//! search over byte ranges.
//!
//! Grounded on `original_source/src/TsvFile.cpp`'s
//! `binary_find_position` (the recursive bisect-to-midpoint-then-getline-
//! twice-to-skip-the-partial-line pattern and the 750-byte linear-scan
//! threshold). `find_first_position`/`find_last_position`/
//! `find_next_position` generalize the original's single `find` into the
//! three-operation contract spec.md §4.8 asks for, keeping the same
//! recursive shape.

use crate::byte_source::ByteSource;
use crate::config::TSV_LINEAR_SCAN_THRESHOLD;
use std::cmp::Ordering;
use std::io;

/// One probe over a sorted TSV file.
pub struct TsvDict<S: ByteSource> {
    source: S,
    len: u64,
}

impl<S: ByteSource> TsvDict<S> {
    pub fn new(source: S) -> Self {
        let len = source.len();
        Self { source, len }
    }

    /// Returns the first matching line's full text, or `""` if absent.
    pub fn find(&mut self, key: &str) -> io::Result<String> {
        let pos = self.find_first_position(key)?;
        if pos == self.len {
            return Ok(String::new());
        }
        let (bytes, _) = self.read_line_bytes(pos)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Byte offset of the first line whose first column equals `key`, or
    /// `self.len` (the end-of-file sentinel) if none.
    pub fn find_first_position(&mut self, key: &str) -> io::Result<u64> {
        self.bisect_first(0, self.len, key)
    }

    /// Byte offset of the last line whose first column equals `key`, or
    /// `self.len` if none.
    pub fn find_last_position(&mut self, key: &str) -> io::Result<u64> {
        self.bisect_last(0, self.len, key)
    }

    /// Byte offset immediately after the last line whose first column
    /// equals `key`, or `self.len` if `key` has no matches.
    pub fn find_next_position(&mut self, key: &str) -> io::Result<u64> {
        let last = self.find_last_position(key)?;
        if last == self.len {
            return Ok(self.len);
        }
        let (_, total_len) = self.read_line_bytes(last)?;
        Ok(last + total_len)
    }

    /// Reads `column` from `limit` lines starting at the `line_offset`-th
    /// line in the file (0-indexed, sequential from the start).
    pub fn read_column(
        &mut self,
        column: usize,
        line_offset: u64,
        limit: usize,
    ) -> io::Result<Vec<String>> {
        let mut pos = 0u64;
        for _ in 0..line_offset {
            if pos >= self.len {
                return Ok(Vec::new());
            }
            let (_, total_len) = self.read_line_bytes(pos)?;
            pos += total_len.max(1);
        }

        let mut out = Vec::with_capacity(limit);
        for _ in 0..limit {
            if pos >= self.len {
                break;
            }
            let (bytes, total_len) = self.read_line_bytes(pos)?;
            let text = String::from_utf8_lossy(&bytes);
            out.push(text.split('\t').nth(column).unwrap_or("").to_string());
            pos += total_len.max(1);
        }
        Ok(out)
    }

    fn bisect_first(&mut self, offset: u64, end: u64, key: &str) -> io::Result<u64> {
        if end.saturating_sub(offset) < TSV_LINEAR_SCAN_THRESHOLD as u64 {
            return self.linear_scan_first(offset, end, key);
        }

        let pivot = offset + (end - offset) / 2;
        let Some((line_start, line_key, line_len)) = self.line_after(pivot)? else {
            return self.linear_scan_first(offset, end, key);
        };

        match line_key.as_str().cmp(key) {
            Ordering::Less => self.bisect_first(line_start + line_len, end, key),
            Ordering::Greater => self.bisect_first(offset, pivot, key),
            Ordering::Equal => {
                let left = self.bisect_first(offset, line_start, key)?;
                if left != self.len {
                    Ok(left)
                } else {
                    Ok(line_start)
                }
            }
        }
    }

    fn bisect_last(&mut self, offset: u64, end: u64, key: &str) -> io::Result<u64> {
        if end.saturating_sub(offset) < TSV_LINEAR_SCAN_THRESHOLD as u64 {
            return self.linear_scan_last(offset, end, key);
        }

        let pivot = offset + (end - offset) / 2;
        let Some((line_start, line_key, line_len)) = self.line_after(pivot)? else {
            return self.linear_scan_last(offset, end, key);
        };

        match line_key.as_str().cmp(key) {
            Ordering::Less => self.bisect_last(line_start + line_len, end, key),
            Ordering::Greater => self.bisect_last(offset, pivot, key),
            Ordering::Equal => {
                let right = self.bisect_last(line_start + line_len, end, key)?;
                if right != self.len {
                    Ok(right)
                } else {
                    Ok(line_start)
                }
            }
        }
    }

    fn linear_scan_first(&mut self, offset: u64, end: u64, key: &str) -> io::Result<u64> {
        let mut pos = offset;
        while pos < end && pos < self.len {
            let (bytes, total_len) = self.read_line_bytes(pos)?;
            let text = String::from_utf8_lossy(&bytes);
            if text.split('\t').next().unwrap_or("") == key {
                return Ok(pos);
            }
            pos += total_len.max(1);
        }
        Ok(self.len)
    }

    fn linear_scan_last(&mut self, offset: u64, end: u64, key: &str) -> io::Result<u64> {
        let mut pos = offset;
        let mut found = self.len;
        while pos < end && pos < self.len {
            let (bytes, total_len) = self.read_line_bytes(pos)?;
            let text = String::from_utf8_lossy(&bytes);
            if text.split('\t').next().unwrap_or("") == key {
                found = pos;
            }
            pos += total_len.max(1);
        }
        Ok(found)
    }

    /// Mirrors the original's "seek to pivot, `getline` twice": the first
    /// read skips the (likely partial) line straddling `pivot`, the
    /// second yields the next full line's start, key column and total
    /// byte length (including its trailing newline, when present).
    fn line_after(&mut self, pivot: u64) -> io::Result<Option<(u64, String, u64)>> {
        if pivot >= self.len {
            return Ok(None);
        }

        let (_partial, partial_total) = self.read_line_bytes(pivot)?;
        let line_start = pivot + partial_total;
        if line_start >= self.len {
            return Ok(None);
        }

        let (bytes, total_len) = self.read_line_bytes(line_start)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let key = text.split('\t').next().unwrap_or("").to_string();
        Ok(Some((line_start, key, total_len)))
    }

    /// Reads the line starting at `pos` up to (not including) its
    /// trailing `\n`. Returns the line bytes and the total byte length
    /// consumed, including the newline when one was found (the last line
    /// in a file without a trailing newline has no `+1`).
    fn read_line_bytes(&mut self, pos: u64) -> io::Result<(Vec<u8>, u64)> {
        let mut buf = Vec::new();
        let mut chunk_size: usize = 256;
        loop {
            let read_from = pos + buf.len() as u64;
            if read_from >= self.len {
                let len = buf.len() as u64;
                return Ok((buf, len));
            }
            let remaining = (self.len - read_from) as usize;
            let read_len = chunk_size.min(remaining);
            let mut chunk = vec![0u8; read_len];
            self.source.seek(read_from)?;
            self.source.read_exact(&mut chunk)?;

            if let Some(nl) = chunk.iter().position(|&b| b == b'\n') {
                buf.extend_from_slice(&chunk[..nl]);
                let len = buf.len() as u64 + 1;
                return Ok((buf, len));
            }
            buf.extend_from_slice(&chunk);
            chunk_size = (chunk_size * 2).min(1 << 20);
        }
    }
}
