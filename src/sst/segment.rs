//! The sorted segment file: an immutable, on-disk sorted run of `(key,
//! value)` records, paired with an in-memory sparse index so a point lookup
//! only ever does a bounded linear scan instead of reading the whole file.
//!
//! ## On-disk layout
//!
//! ```text
//! offset 0: magic         u64 LE = 0x7473732d696e696d  ("minim-sst")
//! then, repeated until EOF:
//!   key_len   u64 LE
//!   key_bytes key_len bytes
//!   val_len   u64 LE
//!   val_bytes val_len bytes
//! ```
//!
//! This crate uses the *uncounted* framing (no key-count header): it lets
//! [`Segment::merge`] stream its output without a prepass over either input.

use crate::codec::{RecordReader, RecordWriter};
use crate::error::{corrupt, Result};
use crate::memtable::MemTable;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The ASCII bytes `minim-sst`, read as a little-endian `u64`.
pub(crate) const MAGIC: u64 = 0x7473732d696e696d;

/// Every `SAMPLE_RATE`-th record (starting at the first) is captured in the
/// sparse index.
pub(crate) const SAMPLE_RATE: usize = 16;

/// An immutable, sorted on-disk run, indexed sparsely in memory.
pub(crate) struct Segment {
    path: PathBuf,
    index: Vec<(Vec<u8>, u64)>,
    count: usize,
}

impl Segment {
    /// Serializes `memtable` to a new segment file at `path`, consuming it
    /// in ascending key order via its traversal operation.
    pub(crate) fn write(path: &Path, memtable: &dyn MemTable) -> Result<Segment> {
        let mut writer = RecordWriter::new(File::create(path)?);
        writer.write_u64(MAGIC)?;

        let mut write_err = None;
        memtable.traverse(&mut |key, value| {
            if write_err.is_none() {
                if let Err(e) = writer.write_record(key, value) {
                    write_err = Some(e);
                }
            }
        });
        if let Some(e) = write_err {
            return Err(e);
        }
        writer.flush()?;

        Self::load(path)
    }

    /// Opens an existing segment file, validates its magic, and builds its
    /// sparse index by a single sequential pass.
    pub(crate) fn load(path: &Path) -> Result<Segment> {
        let mut reader = RecordReader::open(path)?;
        let magic = reader.read_u64()?;
        if magic != MAGIC {
            return Err(corrupt(format!(
                "bad segment magic in {}: expected {MAGIC:#x}",
                path.display()
            )));
        }

        let mut index = Vec::new();
        let mut ordinal = 0usize;
        let mut prev_key: Option<Vec<u8>> = None;
        loop {
            let offset = reader.offset();
            let Some((key, _value)) = reader.try_read_record()? else {
                break;
            };
            if let Some(prev) = &prev_key {
                if key <= *prev {
                    return Err(corrupt(format!(
                        "segment {} keys are not strictly ascending",
                        path.display()
                    )));
                }
            }
            if ordinal % SAMPLE_RATE == 0 {
                index.push((key.clone(), offset));
            }
            prev_key = Some(key);
            ordinal += 1;
        }

        Ok(Segment {
            path: path.to_path_buf(),
            index,
            count: ordinal,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of `(key, value)` records in this segment. Used by the
    /// coordinator to report entry counts in its `flush`/`compact` logging.
    pub(crate) fn record_count(&self) -> usize {
        self.count
    }

    /// Number of sparse-index entries captured for this segment. Exposed
    /// for boundary tests only.
    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Binary-searches the sparse index, seeks, then bounded-linear-scans
    /// for an exact match. Never errors on a plain miss.
    pub(crate) fn get(&self, key: &[u8]) -> Result<(Vec<u8>, bool)> {
        let start = match self.index.partition_point(|(k, _)| k.as_slice() <= key) {
            0 => return Ok((Vec::new(), false)),
            n => self.index[n - 1].1,
        };

        let mut reader = RecordReader::open(&self.path)?;
        reader.seek_to(start)?;

        loop {
            let Some((k, v)) = reader.try_read_record()? else {
                return Ok((Vec::new(), false));
            };
            match k.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => return Ok((v, true)),
                std::cmp::Ordering::Greater => return Ok((Vec::new(), false)),
                std::cmp::Ordering::Less => continue,
            }
        }
    }

    /// Removes the underlying file. Consumes the handle: a deleted segment
    /// cannot be looked up again.
    pub(crate) fn delete(self) -> Result<()> {
        std::fs::remove_file(&self.path)
    }

    /// Two-way merge of `older` and `newer` into a new segment at
    /// `destination`, streaming both inputs record-by-record — neither
    /// segment is ever materialized in memory. On a key present in both,
    /// the newer value wins.
    pub(crate) fn merge(older: &Segment, newer: &Segment, destination: &Path) -> Result<Segment> {
        let mut older_reader = RecordReader::open(&older.path)?;
        let mut newer_reader = RecordReader::open(&newer.path)?;
        expect_magic(&mut older_reader)?;
        expect_magic(&mut newer_reader)?;

        let mut writer = RecordWriter::new(File::create(destination)?);
        writer.write_u64(MAGIC)?;

        let mut older_rec = older_reader.try_read_record()?;
        let mut newer_rec = newer_reader.try_read_record()?;

        loop {
            match (&older_rec, &newer_rec) {
                (None, None) => break,
                (Some((ok, ov)), None) => {
                    writer.write_record(ok, ov)?;
                    older_rec = older_reader.try_read_record()?;
                }
                (None, Some((nk, nv))) => {
                    writer.write_record(nk, nv)?;
                    newer_rec = newer_reader.try_read_record()?;
                }
                (Some((ok, ov)), Some((nk, nv))) => match ok.as_slice().cmp(nk.as_slice()) {
                    std::cmp::Ordering::Equal => {
                        writer.write_record(nk, nv)?;
                        older_rec = older_reader.try_read_record()?;
                        newer_rec = newer_reader.try_read_record()?;
                    }
                    std::cmp::Ordering::Less => {
                        writer.write_record(ok, ov)?;
                        older_rec = older_reader.try_read_record()?;
                    }
                    std::cmp::Ordering::Greater => {
                        writer.write_record(nk, nv)?;
                        newer_rec = newer_reader.try_read_record()?;
                    }
                },
            }
        }
        writer.flush()?;

        Self::load(destination)
    }
}

fn expect_magic<R: std::io::Read>(reader: &mut RecordReader<R>) -> Result<()> {
    let magic = reader.read_u64()?;
    if magic != MAGIC {
        return Err(corrupt("bad segment magic during merge"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::AvlMemTable;
    use tempfile::tempdir;

    fn memtable_of(pairs: &[(&[u8], &[u8])]) -> AvlMemTable {
        let table = AvlMemTable::new();
        for (k, v) in pairs {
            table.upsert(k, v);
        }
        table
    }

    #[test]
    fn round_trips_every_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = memtable_of(&[
            (b"a" as &[u8], b"1" as &[u8]),
            (b"b", b"2"),
            (b"c", b"3"),
        ]);

        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();

        for (k, v) in [(b"a" as &[u8], b"1" as &[u8]), (b"b", b"2"), (b"c", b"3")] {
            assert_eq!(segment.get(k).unwrap(), (v.to_vec(), true));
        }
        assert_eq!(segment.get(b"z").unwrap(), (Vec::new(), false));
    }

    #[test]
    fn single_key_segment_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = memtable_of(&[(b"only" as &[u8], b"value" as &[u8])]);
        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();
        assert_eq!(segment.get(b"only").unwrap(), (b"value".to_vec(), true));
    }

    #[test]
    fn empty_key_and_value_are_legal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = memtable_of(&[(b"" as &[u8], b"" as &[u8]), (b"k", b"v")]);
        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();
        assert_eq!(segment.get(b"").unwrap(), (Vec::new(), true));
    }

    #[test]
    fn record_count_matches_entries_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = memtable_of(&[(b"a" as &[u8], b"1" as &[u8]), (b"b", b"2"), (b"c", b"3")]);
        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();
        assert_eq!(segment.record_count(), 3);
    }

    #[test]
    fn sixteen_or_more_keys_yield_at_least_two_index_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = AvlMemTable::new();
        for i in 0..20u32 {
            table.upsert(format!("k{i:03}").as_bytes(), b"v");
        }
        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();
        assert!(segment.index_len() >= 2);
    }

    #[test]
    fn sampled_offsets_decode_to_their_own_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_0001.sst");
        let table = AvlMemTable::new();
        for i in 0..50u32 {
            table.upsert(format!("k{i:03}").as_bytes(), b"v");
        }
        Segment::write(&path, &table).unwrap();
        let segment = Segment::load(&path).unwrap();

        for (key, offset) in &segment.index {
            let mut reader = RecordReader::open(&path).unwrap();
            reader.seek_to(*offset).unwrap();
            let (decoded_key, _) = reader.try_read_record().unwrap().unwrap();
            assert_eq!(&decoded_key, key);
        }
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.sst");
        std::fs::write(&path, 0xdeadbeefu64.to_le_bytes()).unwrap();
        assert!(Segment::load(&path).is_err());
    }

    #[test]
    fn merge_prefers_newer_on_shared_keys() {
        let dir = tempdir().unwrap();
        let older_path = dir.path().join("data_0001.sst");
        let newer_path = dir.path().join("data_0002.sst");
        let dest = dir.path().join("data_0003.sst");

        Segment::write(&older_path, &memtable_of(&[(b"k" as &[u8], b"old" as &[u8]), (b"a", b"1")])).unwrap();
        Segment::write(&newer_path, &memtable_of(&[(b"k" as &[u8], b"new" as &[u8]), (b"z", b"2")])).unwrap();

        let older = Segment::load(&older_path).unwrap();
        let newer = Segment::load(&newer_path).unwrap();
        let merged = Segment::merge(&older, &newer, &dest).unwrap();

        assert_eq!(merged.get(b"k").unwrap(), (b"new".to_vec(), true));
        assert_eq!(merged.get(b"a").unwrap(), (b"1".to_vec(), true));
        assert_eq!(merged.get(b"z").unwrap(), (b"2".to_vec(), true));
    }

    #[test]
    fn merge_is_commutative_on_disjoint_keys() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("a.sst");
        let b_path = dir.path().join("b.sst");

        Segment::write(&a_path, &memtable_of(&[(b"a" as &[u8], b"1" as &[u8]), (b"c", b"3")])).unwrap();
        Segment::write(&b_path, &memtable_of(&[(b"b" as &[u8], b"2" as &[u8]), (b"d", b"4")])).unwrap();

        let a = Segment::load(&a_path).unwrap();
        let b = Segment::load(&b_path).unwrap();

        let ab = Segment::merge(&a, &b, &dir.path().join("ab.sst")).unwrap();
        let ba = Segment::merge(&b, &a, &dir.path().join("ba.sst")).unwrap();

        for key in [b"a" as &[u8], b"b", b"c", b"d"] {
            assert_eq!(ab.get(key).unwrap(), ba.get(key).unwrap());
        }
    }

    #[test]
    fn merge_preserves_tombstones() {
        let dir = tempdir().unwrap();
        let older_path = dir.path().join("data_0001.sst");
        let newer_path = dir.path().join("data_0002.sst");

        Segment::write(&older_path, &memtable_of(&[(b"k" as &[u8], b"v" as &[u8])])).unwrap();
        Segment::write(&newer_path, &memtable_of(&[(b"k" as &[u8], b"" as &[u8])])).unwrap();

        let older = Segment::load(&older_path).unwrap();
        let newer = Segment::load(&newer_path).unwrap();
        let merged = Segment::merge(&older, &newer, &dir.path().join("m.sst")).unwrap();

        assert_eq!(merged.get(b"k").unwrap(), (Vec::new(), true));
    }
}
