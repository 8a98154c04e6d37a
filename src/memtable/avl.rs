//! Height-balanced memtable with lock-free reads.
//!
//! Every node stores its subtree height; for every node the heights of its
//! two children differ by at most one. An upsert walks from the root to the
//! insertion point, then rebuilds a fresh path back up to a new root —
//! sharing every subtree it didn't touch — rebalancing with single or
//! double rotations as it goes. The new root is published with a
//! compare-and-swap on an [`arc_swap::ArcSwapOption`], retried if another
//! writer raced it. Readers load the current root and walk it; they never
//! take a lock and never see a partially-built tree, because a tree is
//! immutable once another thread can reach it.

use super::MemTable;
use arc_swap::ArcSwapOption;
use std::cmp::Ordering;
use std::sync::Arc;

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    height: u8,
    left: Option<Arc<Node>>,
    right: Option<Arc<Node>>,
}

fn height(node: &Option<Arc<Node>>) -> u8 {
    node.as_ref().map_or(0, |n| n.height)
}

fn balance_of(left: &Option<Arc<Node>>, right: &Option<Arc<Node>>) -> i16 {
    height(right) as i16 - height(left) as i16
}

fn build(key: Vec<u8>, value: Vec<u8>, left: Option<Arc<Node>>, right: Option<Arc<Node>>) -> Arc<Node> {
    let height = 1 + height(&left).max(height(&right));
    Arc::new(Node {
        key,
        value,
        height,
        left,
        right,
    })
}

/// Rotates `n.right` up to become the new subtree root; `n` becomes its new
/// left child.
fn rotate_left(n: &Node) -> Arc<Node> {
    let r = n.right.as_ref().expect("rotate_left requires a right child");
    let new_left = build(n.key.clone(), n.value.clone(), n.left.clone(), r.left.clone());
    build(r.key.clone(), r.value.clone(), Some(new_left), r.right.clone())
}

/// Rotates `n.left` up to become the new subtree root; `n` becomes its new
/// right child.
fn rotate_right(n: &Node) -> Arc<Node> {
    let l = n.left.as_ref().expect("rotate_right requires a left child");
    let new_right = build(n.key.clone(), n.value.clone(), l.right.clone(), n.right.clone());
    build(l.key.clone(), l.value.clone(), l.left.clone(), Some(new_right))
}

fn rebalance(n: Arc<Node>) -> Arc<Node> {
    match balance_of(&n.left, &n.right) {
        bf if bf < -1 => {
            let left = n.left.as_ref().expect("balance < -1 implies a left child");
            if balance_of(&left.left, &left.right) > 0 {
                let new_left = rotate_left(left);
                let lifted = build(n.key.clone(), n.value.clone(), Some(new_left), n.right.clone());
                rotate_right(&lifted)
            } else {
                rotate_right(&n)
            }
        }
        bf if bf > 1 => {
            let right = n.right.as_ref().expect("balance > 1 implies a right child");
            if balance_of(&right.left, &right.right) < 0 {
                let new_right = rotate_right(right);
                let lifted = build(n.key.clone(), n.value.clone(), n.left.clone(), Some(new_right));
                rotate_left(&lifted)
            } else {
                rotate_left(&n)
            }
        }
        _ => n,
    }
}

/// Inserts (or updates) `key` into the subtree rooted at `node`, returning a
/// new root for the subtree. Unmodified subtrees are shared (cloning an
/// `Arc`, not the data behind it) with the tree the caller is still reading.
fn insert(node: &Option<Arc<Node>>, key: &[u8], value: &[u8]) -> Arc<Node> {
    let n = match node {
        None => return build(key.to_vec(), value.to_vec(), None, None),
        Some(n) => n,
    };

    match key.cmp(n.key.as_slice()) {
        Ordering::Equal => build(key.to_vec(), value.to_vec(), n.left.clone(), n.right.clone()),
        Ordering::Less => {
            let new_left = insert(&n.left, key, value);
            rebalance(build(n.key.clone(), n.value.clone(), Some(new_left), n.right.clone()))
        }
        Ordering::Greater => {
            let new_right = insert(&n.right, key, value);
            rebalance(build(n.key.clone(), n.value.clone(), n.left.clone(), Some(new_right)))
        }
    }
}

fn lookup<'a>(mut node: &'a Option<Arc<Node>>, key: &[u8]) -> (Vec<u8>, bool) {
    while let Some(n) = node {
        match key.cmp(n.key.as_slice()) {
            Ordering::Equal => return (n.value.clone(), true),
            Ordering::Less => node = &n.left,
            Ordering::Greater => node = &n.right,
        }
    }
    (Vec::new(), false)
}

fn walk(node: &Option<Arc<Node>>, visitor: &mut dyn FnMut(&[u8], &[u8])) {
    if let Some(n) = node {
        walk(&n.left, visitor);
        visitor(&n.key, &n.value);
        walk(&n.right, visitor);
    }
}

pub(crate) struct AvlMemTable {
    root: ArcSwapOption<Node>,
}

impl AvlMemTable {
    pub(crate) fn new() -> Self {
        Self {
            root: ArcSwapOption::from(None),
        }
    }

    /// For invariant tests only: the tree height of the current root, 0 if
    /// empty.
    #[cfg(test)]
    fn height(&self) -> u8 {
        height(&self.root.load_full())
    }

    /// For invariant tests only: walks the tree checking I1 (strictly
    /// ascending in-order keys), I2 (balance in {-1, 0, 1}), and I3 (stored
    /// height equals 1 + max child height).
    #[cfg(test)]
    fn check_invariants(&self) {
        fn visit(node: &Option<Arc<Node>>, prev: &mut Option<Vec<u8>>) -> u8 {
            let Some(n) = node else { return 0 };
            let lh = visit(&n.left, prev);
            if let Some(p) = prev {
                assert!(p.as_slice() < n.key.as_slice(), "keys must be strictly ascending");
            }
            *prev = Some(n.key.clone());
            let rh = visit(&n.right, prev);

            let bf = rh as i16 - lh as i16;
            assert!((-1..=1).contains(&bf), "balance factor {bf} out of range");
            assert_eq!(n.height, 1 + lh.max(rh), "stored height must match children");
            n.height
        }

        let mut prev = None;
        visit(&self.root.load_full(), &mut prev);
    }
}

impl MemTable for AvlMemTable {
    fn get(&self, key: &[u8]) -> (Vec<u8>, bool) {
        lookup(&self.root.load_full(), key)
    }

    fn upsert(&self, key: &[u8], value: &[u8]) {
        loop {
            let current = self.root.load_full();
            let new_root = Some(insert(&current, key, value));
            let previous = self.root.compare_and_swap(&current, new_root);
            let raced = match (&*previous, &current) {
                (Some(p), Some(c)) => !Arc::ptr_eq(p, c),
                (None, None) => false,
                _ => true,
            };
            if !raced {
                return;
            }
        }
    }

    fn traverse(&self, visitor: &mut dyn FnMut(&[u8], &[u8])) {
        walk(&self.root.load_full(), visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_has_height_zero() {
        let t = AvlMemTable::new();
        assert_eq!(t.height(), 0);
        t.check_invariants();
    }

    #[test]
    fn height_stays_logarithmic_for_eight_keys() {
        let t = AvlMemTable::new();
        for k in [b"f", b"b", b"c", b"d", b"a", b"h", b"e", b"g"] {
            t.upsert(k, b"v");
        }
        t.upsert(b"f", b"rewritten");
        t.check_invariants();
        assert!(t.height() <= 4, "height {} exceeds ceil(log2(8))+1", t.height());

        let mut seen = Vec::new();
        t.traverse(&mut |k, v| seen.push((k.to_vec(), v.to_vec())));
        let keys: Vec<_> = seen.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a", b"b", b"c", b"d", b"e", b"f", b"g", b"h"]);
        assert_eq!(seen[5].1, b"rewritten");
    }

    #[test]
    fn rewriting_a_key_preserves_structure_invariants() {
        let t = AvlMemTable::new();
        for i in 0..20u32 {
            t.upsert(format!("k{i:03}").as_bytes(), b"v");
        }
        t.check_invariants();
        t.upsert(b"k010", b"rewritten");
        t.check_invariants();
        assert_eq!(t.get(b"k010").0, b"rewritten");
    }

    #[test]
    fn hundred_thousand_random_keys_preserve_invariants_and_retrieval() {
        use rand::Rng;
        let t = AvlMemTable::new();
        let mut rng = rand::thread_rng();
        let mut keys = std::collections::HashSet::new();

        while keys.len() < 100_000 {
            let k: [u8; 3] = rng.gen();
            if keys.insert(k) {
                t.upsert(&k, b"v");
            }
        }

        t.check_invariants();
        for k in &keys {
            let (_, present) = t.get(k);
            assert!(present, "key {k:?} must be retrievable after insertion");
        }
    }
}
