//! The in-memory ordered key→value buffer that receives live writes.
//!
//! Two interchangeable implementations are provided behind the [`MemTable`]
//! trait, matching the two variants this system has always shipped:
//!
//! - [`avl::AvlMemTable`]: a height-balanced binary search tree whose nodes
//!   are rebuilt along the insertion path and published by an atomic
//!   compare-and-swap of the root (`arc_swap`). Readers never block.
//! - [`treap::TreapMemTable`]: a randomized BST (a treap) mutated in place
//!   under a reader/writer lock. Simpler, no structural sharing.
//!
//! The coordinator installs the `avl` variant as its live memtable, since
//! that is the variant built for the concurrent-reader workload the
//! coordinator actually has (see the crate's top-level docs on concurrency).
//! The `treap` variant is fully tested and usable on its own.

mod avl;
mod treap;

pub(crate) use avl::AvlMemTable;
pub(crate) use treap::TreapMemTable;

/// Shared contract for both memtable variants.
///
/// Neither variant can fail: inserting or looking up a key-value pair is
/// infallible by construction (the only failure mode, allocation failure,
/// is not observable in safe Rust and would panic rather than return an
/// error).
pub(crate) trait MemTable: Send + Sync {
    /// Returns the value currently associated with `key`, and whether it was
    /// present at all.
    fn get(&self, key: &[u8]) -> (Vec<u8>, bool);

    /// Inserts `key` with `value`, or replaces the value if `key` is already
    /// present. Last writer wins.
    fn upsert(&self, key: &[u8], value: &[u8]);

    /// Invokes `visitor` on every `(key, value)` pair in ascending key order.
    fn traverse(&self, visitor: &mut dyn FnMut(&[u8], &[u8]));
}
