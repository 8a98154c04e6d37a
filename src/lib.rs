//! # `lsmkv`
//!
//! `lsmkv` is an embedded, persistent, ordered key→value store built on the
//! Log-Structured Merge-Tree (LSM-Tree) pattern: writes land in memory and on
//! a write-ahead log, get periodically frozen into immutable sorted segment
//! files, and those segments are later merged down by compaction.
//!
//! ## Modules
//!
//! - [`codec`]: the shared binary framing (length-prefixed byte strings)
//!   used by both the write-ahead log and segment files.
//! - [`memtable`]: the in-memory ordered buffer that receives live writes,
//!   in two interchangeable flavors (a lock-free height-balanced tree and a
//!   lock-guarded treap).
//! - [`write_ahead_log`]: the append-only log that makes an unflushed
//!   memtable survive a crash.
//! - [`sst`]: the immutable, sparsely-indexed on-disk segment format, plus
//!   the two-way streaming merge compaction is built from.
//! - [`api`]: [`api::StorageEngine`], the coordinator that wires the above
//!   into a single `open`/`set`/`get`/`delete`/`flush`/`compact` surface.
//!
//! ## Data flow
//!
//! A write: caller → `StorageEngine::set` → WAL `commit` (flushed before
//! returning) → memtable `upsert`. A read: caller → `StorageEngine::get` →
//! memtable, then segments newest to oldest, stopping at the first hit
//! (including a tombstone). `flush` freezes the memtable into a new segment
//! and truncates the WAL; `compact` repeatedly merges the two newest
//! segments until one remains.
//!
//! Logging goes through the `log` facade; a binary consumer (see `main.rs`)
//! installs `env_logger` to render it.

#![allow(dead_code)]

pub mod api;
mod codec;
mod error;
mod memtable;
mod sst;
mod write_ahead_log;
