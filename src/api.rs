//! # API
//!
//! [`StorageEngine`] is the LSM coordinator: it owns the data directory, the
//! live memtable, the write-ahead log, and the ordered stack of on-disk
//! segments, and sequences every write, read, flush, and compaction across
//! them so that callers only ever see a consistent key→value view.
//!
//! ## `StorageEngine` fields
//!
//! ```text
//! pub struct StorageEngine {
//!     dir: PathBuf,
//!     state: RwLock<State>,
//!     next_segment: AtomicU32,
//! }
//! ```
//!
//! - **`dir`**: the data directory this store is rooted at. Segment
//!   filenames and the WAL filename are both resolved relative to it; it
//!   never changes after `open`.
//! - **`state`**: the [`State`] bundle — live memtable handle, segment
//!   stack, and WAL handle — guarded by one lock so a write's WAL-append and
//!   memtable-upsert, and a flush's memtable-swap and segment-stack-push,
//!   each happen as a single atomic step from a reader's point of view.
//! - **`next_segment`**: the next segment number to allocate, as a plain
//!   [`std::sync::atomic::AtomicU32`] rather than a field behind `state`'s
//!   lock, so tests and diagnostics can read it without contending with an
//!   in-progress flush or compaction.
//!
//! ## `State` fields
//!
//! ```text
//! struct State {
//!     memtable: Arc<AvlMemTable>,
//!     segments: Vec<Segment>,
//!     wal: WriteAheadLog,
//! }
//! ```
//!
//! - **`memtable`**: the live, height-balanced memtable receiving writes.
//!   Held behind an `Arc` so `flush` can hand the old memtable off to the
//!   segment writer and install a brand new one without cloning any of its
//!   contents.
//! - **`segments`**: the on-disk segment stack, oldest first. `get` walks it
//!   newest to oldest; `flush` pushes one new segment onto the end;
//!   `compact` pops pairs off the end and pushes their merge back on.
//! - **`wal`**: the write-ahead log handle `set` appends to and `flush`
//!   resets.
//!
//! ## `StorageEngine` methods
//!
//! - **`open`**: replays any existing WAL into a fresh memtable, loads every
//!   segment file already on disk in filename order, and performs an
//!   initial flush so a memtable recovered from the WAL never sits
//!   unflushed.
//! - **`set`** / **`delete`**: append to the WAL, then upsert into the
//!   memtable (a delete is a `set` of the empty-string tombstone).
//! - **`get`**: memtable first, then segments newest to oldest, stopping at
//!   the first hit.
//! - **`flush`**: freezes the memtable into a new segment file, installs an
//!   empty memtable, and resets the WAL.
//! - **`compact`**: repeatedly merges the two newest segments until one
//!   remains.
//!
//! ## Concurrency
//!
//! A single [`std::sync::RwLock`] guards the memtable handle, the segment
//! stack, and the WAL together, because a write must append to the WAL and
//! upsert into the memtable as one step: they must never drift apart. Reads
//! take the shared lock; `flush` and `compact` take the exclusive lock. The
//! next-segment counter is a separate atomic so it can be bumped without
//! widening the write lock's critical section any further than it needs to
//! be.
//!
//! ## Logging
//!
//! `open` logs the WAL-replay outcome (via [`crate::write_ahead_log::WriteAheadLog::replay`])
//! and the number of segments discovered; `flush` logs the new segment's
//! path and entry count; `compact` logs each pair merged, the resulting
//! segment, and how many entries were dropped because the pair shared keys.
//! None of these calls sit on a path that can itself fail.

use crate::memtable::{AvlMemTable, MemTable};
use crate::sst::Segment;
use crate::write_ahead_log::{WriteAheadLog, WAL_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::Result;

/// Guarded together: a write touches the WAL and the memtable as one step,
/// and a flush replaces the memtable and extends the segment stack as one
/// step.
struct State {
    memtable: Arc<AvlMemTable>,
    segments: Vec<Segment>,
    wal: WriteAheadLog,
}

/// The LSM coordinator: one instance per data directory.
pub struct StorageEngine {
    dir: PathBuf,
    state: RwLock<State>,
    next_segment: AtomicU32,
}

impl StorageEngine {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Replays any prior WAL into a fresh memtable, loads every segment file
    /// already present in `dir` in filename order, and performs an initial
    /// flush so a memtable recovered from the WAL is never left unflushed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let wal_path = dir.join(WAL_FILE_NAME);
        let wal = WriteAheadLog::open(&wal_path)?;
        let memtable = Arc::new(WriteAheadLog::replay(&wal_path, AvlMemTable::new)?);

        let loaded = load_segments(&dir)?;
        let next = loaded.last_segment_number.map_or(1, |n| n + 1);

        log::info!(
            "open {}: recovered {} segment(s), next segment is {next:04}",
            dir.display(),
            loaded.segments.len()
        );

        let store = Self {
            dir,
            state: RwLock::new(State {
                memtable,
                segments: loaded.segments,
                wal,
            }),
            next_segment: AtomicU32::new(next),
        };
        store.flush()?;
        Ok(store)
    }

    /// Appends `(key, value)` to the WAL, then upserts it into the live
    /// memtable. A WAL append failure is fatal: no retry, no rollback.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        state.wal.commit(key, value)?;
        state.memtable.upsert(key, value);
        Ok(())
    }

    /// Equivalent to `set(key, "")`: the empty value is the tombstone that
    /// encodes a logical delete.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.set(key, b"")
    }

    /// Looks up `key`: memtable first, then segments newest to oldest. A
    /// tombstone terminates the search at the segment it was found in, even
    /// though the caller can't distinguish a tombstone from "never written"
    /// in the returned value.
    ///
    /// Never fails at this boundary: an I/O error while reading a segment
    /// is an operational fault `get`'s contract has no way to report, so it
    /// panics rather than silently returning a miss.
    pub fn get(&self, key: &[u8]) -> Vec<u8> {
        let state = self.state.read().expect("coordinator lock poisoned");

        let (value, present) = state.memtable.get(key);
        if present {
            return value;
        }

        for segment in state.segments.iter().rev() {
            match segment.get(key) {
                Ok((value, true)) => return value,
                Ok((_, false)) => continue,
                Err(e) => panic!("segment {} unreadable: {e}", segment.path().display()),
            }
        }

        Vec::new()
    }

    /// Freezes the live memtable into a new segment, installs an empty
    /// memtable in its place, and resets the WAL. If the process dies
    /// between the segment write and the WAL reset, the next `open` simply
    /// replays and re-flushes the same writes into a second, superseding
    /// segment; newest-wins read order absorbs the duplicate.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");

        let number = self.next_segment.fetch_add(1, Ordering::SeqCst);
        let path = segment_path(&self.dir, number);
        log::debug!("flush: freezing live memtable, writing {}", path.display());

        let segment = Segment::write(&path, state.memtable.as_ref())?;
        let entries = segment.record_count();

        state.memtable = Arc::new(AvlMemTable::new());
        state.segments.push(segment);
        state.wal.reset()?;

        log::info!("flush: wrote {} ({entries} entries)", path.display());
        Ok(())
    }

    /// Repeatedly merges the two newest segments into one until only a
    /// single segment remains, deleting each pair's input files once its
    /// merge has been written.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");

        while state.segments.len() > 1 {
            let newer = state.segments.pop().expect("len > 1 implies a newer segment");
            let older = state.segments.pop().expect("len > 1 implies an older segment");

            let number = self.next_segment.fetch_add(1, Ordering::SeqCst);
            let dest = segment_path(&self.dir, number);
            log::debug!(
                "compact: merging {} ({} entries) + {} ({} entries)",
                older.path().display(),
                older.record_count(),
                newer.path().display(),
                newer.record_count()
            );
            let merged = Segment::merge(&older, &newer, &dest)?;
            let dropped = (older.record_count() + newer.record_count()).saturating_sub(merged.record_count());

            log::info!(
                "compact: merged {} + {} -> {} ({} entries dropped)",
                older.path().display(),
                newer.path().display(),
                dest.display(),
                dropped
            );

            older.delete()?;
            newer.delete()?;
            state.segments.push(merged);
        }

        Ok(())
    }

    /// Deletes every segment and resets the WAL, leaving an empty store at
    /// the same directory. Not part of the read/write/flush/compact
    /// contract; provided so the CLI has something to back its `clear`
    /// subcommand with.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write().expect("coordinator lock poisoned");
        for segment in state.segments.drain(..) {
            segment.delete()?;
        }
        state.memtable = Arc::new(AvlMemTable::new());
        state.wal.reset()?;
        log::info!("clear: {} reset to empty", self.dir.display());
        Ok(())
    }

    /// Number of segments currently in the stack. Exposed for diagnostics
    /// and tests; not part of the read/write contract.
    pub fn segment_count(&self) -> usize {
        self.state.read().expect("coordinator lock poisoned").segments.len()
    }
}

fn segment_path(dir: &Path, number: u32) -> PathBuf {
    dir.join(format!("data_{number:04}.sst"))
}

/// Parses the segment number out of a `data_%04d.sst` filename.
fn parse_segment_number(file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix("data_")?.strip_suffix(".sst")?;
    digits.parse().ok()
}

struct LoadedSegments {
    segments: Vec<Segment>,
    last_segment_number: Option<u32>,
}

/// Walks `dir` for segment files, loading them in filename (segment number)
/// order so the stack ends up oldest-first.
fn load_segments(dir: &Path) -> Result<LoadedSegments> {
    let mut numbered = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if let Some(number) = parse_segment_number(&name) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);

    let last_segment_number = numbered.last().map(|(n, _)| *n);
    let mut segments = Vec::with_capacity(numbered.len());
    for (_, path) in numbered {
        segments.push(Segment::load(&path)?);
    }

    Ok(LoadedSegments {
        segments,
        last_segment_number,
    })
}
