//! # Write-Ahead Log (WAL)
//!
//! The write-ahead log is what makes an unflushed memtable survivable: every
//! write that has been acknowledged to a caller but not yet folded into a
//! segment file lives here first, in the exact order it was applied. If the
//! process dies before the next `flush`, reopening the store replays this
//! file and rebuilds the memtable the crash destroyed.
//!
//! ## `WriteAheadLog` fields
//!
//! ```text
//! struct WriteAheadLog {
//!     writer: RecordWriter<File>,
//! }
//! ```
//!
//! - **`writer`**: the buffered, length-prefixed record writer (see
//!   [`crate::codec::RecordWriter`]) wrapping the WAL's underlying `File`.
//!   There is exactly one of these per store, opened once in [`WriteAheadLog::open`]
//!   and reused for the lifetime of the coordinator; `commit` and `reset`
//!   both operate on it directly rather than reopening the file each time.
//!
//! ## WAL file layout
//!
//! The body is the same length-prefixed `(key, value)` record encoding the
//! segment file uses (see [`crate::codec`] and [`crate::sst`]), just without
//! a leading magic number — there is nothing to validate against, since a
//! WAL is never read by anything other than the store that wrote it:
//!
//! ```text
//! +-------------------+
//! |   key_len  (u64)   |
//! +-------------------+
//! |   key_bytes        |  (key_len bytes)
//! +-------------------+
//! |   val_len  (u64)   |
//! +-------------------+
//! |   val_bytes         |  (val_len bytes)
//! +-------------------+
//! |   key_len  (u64)   |   ... repeated for every commit since the last reset
//! +-------------------+
//! ```
//!
//! ## Methods
//!
//! - **`open`**: creates or reopens the WAL file at a path, in append mode,
//!   ready for `commit`.
//! - **`commit`**: appends one `(key, value)` record and flushes the
//!   buffered writer before returning, so a process crash immediately after
//!   `commit` returns cannot lose that write. This crate does not
//!   additionally call `fsync`; that is a documented possible hardening for
//!   deployments that need to survive a host-level crash, not just a
//!   process crash.
//! - **`reset`**: truncates the file to zero length and seeks back to the
//!   start, called once a flush has safely moved every commit since the
//!   last reset into a segment file.
//! - **`replay`**: opens an existing WAL and upserts every record it
//!   contains, in order, into a freshly constructed memtable. A missing WAL
//!   file replays as an empty memtable rather than an error — the
//!   coordinator cannot otherwise tell "store has never been written to"
//!   apart from "WAL was reset and nothing has been committed since".

use crate::codec::{RecordReader, RecordWriter};
use crate::error::Result;
use crate::memtable::MemTable;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Filename of the WAL within a store's data directory.
pub(crate) const WAL_FILE_NAME: &str = "wal.dat";

pub(crate) struct WriteAheadLog {
    writer: RecordWriter<File>,
}

impl WriteAheadLog {
    /// Opens the WAL file for append, creating it if it doesn't exist yet.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            writer: RecordWriter::new(file),
        })
    }

    /// Appends one `(key, value)` record and flushes before returning.
    pub(crate) fn commit(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer.write_record(key, value)?;
        self.writer.flush()
    }

    /// Truncates the WAL to zero length and seeks back to the start, ready
    /// for the next round of commits.
    pub(crate) fn reset(&mut self) -> Result<()> {
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Opens an existing WAL at `path` and replays its records into a fresh
    /// memtable built by `new_table`, in write order (so later writes to the
    /// same key correctly shadow earlier ones).
    ///
    /// A WAL that doesn't exist is treated exactly like an empty one — the
    /// coordinator cannot tell "no prior WAL" from "WAL with nothing in it"
    /// apart from this call succeeding either way. A short read or a
    /// truncated trailing record (the shape a crash mid-`write_all` leaves
    /// behind) is tolerated: replay keeps everything decoded so far and
    /// discards the partial remainder rather than failing the whole open.
    pub(crate) fn replay<M: MemTable>(path: &Path, new_table: impl FnOnce() -> M) -> Result<M> {
        let table = new_table();

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("WAL replay at {}: no WAL present, starting empty", path.display());
                return Ok(table);
            }
            Err(e) => return Err(e),
        };

        let mut reader = RecordReader::new(file);
        let mut recovered = 0usize;
        loop {
            match reader.try_read_record() {
                Ok(Some((key, value))) => {
                    table.upsert(&key, &value);
                    recovered += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "WAL replay at {}: discarding a truncated trailing record after recovering {} record(s)",
                        path.display(),
                        recovered
                    );
                    break;
                }
            }
        }

        log::debug!("WAL replay at {}: recovered {} record(s)", path.display(), recovered);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::AvlMemTable;
    use tempfile::tempdir;

    #[test]
    fn commit_then_replay_recovers_every_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE_NAME);

        {
            let mut wal = WriteAheadLog::open(&path).unwrap();
            wal.commit(b"a", b"1").unwrap();
            wal.commit(b"b", b"2").unwrap();
            wal.commit(b"a", b"3").unwrap();
        }

        let table = WriteAheadLog::replay(&path, AvlMemTable::new).unwrap();
        assert_eq!(table.get(b"a"), (b"3".to_vec(), true));
        assert_eq!(table.get(b"b"), (b"2".to_vec(), true));
    }

    #[test]
    fn missing_wal_replays_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE_NAME);
        let table = WriteAheadLog::replay(&path, AvlMemTable::new).unwrap();
        assert_eq!(table.get(b"anything"), (Vec::new(), false));
    }

    #[test]
    fn reset_truncates_and_allows_fresh_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE_NAME);

        let mut wal = WriteAheadLog::open(&path).unwrap();
        wal.commit(b"a", b"1").unwrap();
        wal.reset().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        wal.commit(b"b", b"2").unwrap();
        drop(wal);

        let table = WriteAheadLog::replay(&path, AvlMemTable::new).unwrap();
        assert_eq!(table.get(b"a"), (Vec::new(), false));
        assert_eq!(table.get(b"b"), (b"2".to_vec(), true));
    }

    #[test]
    fn truncated_trailing_record_is_discarded_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE_NAME);

        {
            let mut wal = WriteAheadLog::open(&path).unwrap();
            wal.commit(b"whole", b"record").unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len + 4).unwrap(); // simulate a crash mid-append: dangling partial record

        let table = WriteAheadLog::replay(&path, AvlMemTable::new).unwrap();
        assert_eq!(table.get(b"whole"), (b"record".to_vec(), true));
    }
}
