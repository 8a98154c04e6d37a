//! Binary I/O codec shared by the sorted segment file (`sst`) and the
//! write-ahead log (`write_ahead_log`). Both are, at the byte level, nothing
//! more than a sequence of length-prefixed `(key, value)` records; the segment
//! additionally carries a magic number ahead of its records. Keeping the
//! codec in one place means both formats read and write records identically,
//! and only differ in whether a magic number is present.
//!
//! All integers are unsigned 64-bit little-endian. A length prefix followed
//! by that many raw bytes encodes a byte string of arbitrary content,
//! including the empty string.

use crate::error::{corrupt, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

/// Buffered little-endian writer over any [`Write`] sink.
pub(crate) struct RecordWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> RecordWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub(crate) fn write_u64(&mut self, n: u64) -> Result<()> {
        self.inner.write_all(&n.to_le_bytes())
    }

    /// Writes an 8-byte little-endian length prefix followed by `bytes`.
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u64(bytes.len() as u64)?;
        self.inner.write_all(bytes)
    }

    /// Writes one `(key, value)` record as two length-prefixed byte strings.
    pub(crate) fn write_record(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_bytes(key)?;
        self.write_bytes(value)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    pub(crate) fn get_mut(&mut self) -> &mut W {
        self.inner.get_mut()
    }
}

/// Buffered little-endian reader over a seekable source.
///
/// Tracks its own logical byte offset so callers (the sparse-index builder,
/// in particular) can record "the byte offset of this record" without an
/// extra `seek` just to ask the OS where the cursor is.
pub(crate) struct RecordReader<R> {
    inner: BufReader<R>,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            offset: 0,
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads a little-endian `u64`, distinguishing a clean end-of-stream
    /// (returns `Ok(None)`, nothing at all was read) from a short read that
    /// starts a record but can't finish the length prefix (a hard error:
    /// the stream is corrupt, not merely finished).
    pub(crate) fn try_read_u64(&mut self) -> Result<Option<u64>> {
        let mut buf = [0u8; 8];
        let n = read_fill(&mut self.inner, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if n < 8 {
            return Err(corrupt("truncated length prefix"));
        }
        self.offset += 8;
        Ok(Some(u64::from_le_bytes(buf)))
    }

    /// Reads a `u64` that must be present; any short read here means the
    /// record started but the stream ended mid-way through it.
    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        self.try_read_u64()?
            .ok_or_else(|| corrupt("unexpected end of stream reading length prefix"))
    }

    /// Reads exactly `len` bytes. A short read is always corruption here:
    /// by the time this is called the length prefix has already announced
    /// how many bytes must follow.
    pub(crate) fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = read_fill(&mut self.inner, &mut buf)?;
        if n < len {
            return Err(corrupt("short read: declared length exceeds available bytes"));
        }
        self.offset += len as u64;
        Ok(buf)
    }

    fn read_length_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64()?;
        self.read_exact_bytes(len as usize)
    }

    /// Attempts to read one `(key, value)` record. Returns `Ok(None)` only
    /// when the stream ends cleanly at a record boundary (before the key's
    /// length prefix); anything else that goes wrong is corruption.
    pub(crate) fn try_read_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let key_len = match self.try_read_u64()? {
            Some(n) => n,
            None => return Ok(None),
        };
        let key = self.read_exact_bytes(key_len as usize)?;
        let value = self.read_length_prefixed()?;
        Ok(Some((key, value)))
    }
}

impl<R: Read + Seek> RecordReader<R> {
    /// Seeks to an absolute byte offset, discarding any buffered read state.
    pub(crate) fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.offset = pos;
        Ok(())
    }
}

impl RecordReader<File> {
    pub(crate) fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

/// Fills `buf` as far as the source allows, returning the number of bytes
/// actually read (which may be less than `buf.len()` at end-of-file).
/// Unlike [`Read::read_exact`], the caller can tell clean EOF (0 bytes)
/// apart from a short read (1..`buf.len()` bytes).
fn read_fill(r: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
