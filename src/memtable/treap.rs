//! Randomized memtable (a treap): a binary search tree on keys that is also
//! a max-heap on independently-assigned random priorities. Because
//! priorities are uniform, the tree's expected height is logarithmic
//! without any explicit balance bookkeeping. Simpler than the height-
//! balanced variant, at the cost of requiring an exterior lock: mutation
//! happens in place rather than by building a fresh path.

use super::MemTable;
use rand::Rng;
use std::cmp::Ordering;
use std::sync::RwLock;

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    priority: u64,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

fn random_priority() -> u64 {
    // A uniform 63-bit priority: the top bit is cleared so comparisons
    // never have to reason about sign.
    rand::thread_rng().gen::<u64>() >> 1
}

fn rotate_right(mut n: Box<Node>) -> Box<Node> {
    let mut l = n.left.take().expect("rotate_right requires a left child");
    n.left = l.right.take();
    l.right = Some(n);
    l
}

fn rotate_left(mut n: Box<Node>) -> Box<Node> {
    let mut r = n.right.take().expect("rotate_left requires a right child");
    n.right = r.left.take();
    r.left = Some(n);
    r
}

fn insert(node: Option<Box<Node>>, key: &[u8], value: &[u8]) -> Box<Node> {
    let mut n = match node {
        None => {
            return Box::new(Node {
                key: key.to_vec(),
                value: value.to_vec(),
                priority: random_priority(),
                left: None,
                right: None,
            })
        }
        Some(n) => n,
    };

    match key.cmp(n.key.as_slice()) {
        Ordering::Equal => {
            n.value = value.to_vec();
            n
        }
        Ordering::Less => {
            n.left = Some(insert(n.left.take(), key, value));
            if n.left.as_ref().unwrap().priority > n.priority {
                n = rotate_right(n);
            }
            n
        }
        Ordering::Greater => {
            n.right = Some(insert(n.right.take(), key, value));
            if n.right.as_ref().unwrap().priority > n.priority {
                n = rotate_left(n);
            }
            n
        }
    }
}

fn lookup<'a>(mut node: &'a Option<Box<Node>>, key: &[u8]) -> (Vec<u8>, bool) {
    while let Some(n) = node {
        match key.cmp(n.key.as_slice()) {
            Ordering::Equal => return (n.value.clone(), true),
            Ordering::Less => node = &n.left,
            Ordering::Greater => node = &n.right,
        }
    }
    (Vec::new(), false)
}

fn walk(node: &Option<Box<Node>>, visitor: &mut dyn FnMut(&[u8], &[u8])) {
    if let Some(n) = node {
        walk(&n.left, visitor);
        visitor(&n.key, &n.value);
        walk(&n.right, visitor);
    }
}

pub(crate) struct TreapMemTable {
    root: RwLock<Option<Box<Node>>>,
}

impl TreapMemTable {
    pub(crate) fn new() -> Self {
        Self {
            root: RwLock::new(None),
        }
    }
}

impl MemTable for TreapMemTable {
    fn get(&self, key: &[u8]) -> (Vec<u8>, bool) {
        let root = self.root.read().expect("treap lock poisoned");
        lookup(&root, key)
    }

    fn upsert(&self, key: &[u8], value: &[u8]) {
        let mut root = self.root.write().expect("treap lock poisoned");
        let taken = root.take();
        *root = Some(insert(taken, key, value));
    }

    fn traverse(&self, visitor: &mut dyn FnMut(&[u8], &[u8])) {
        let root = self.root.read().expect("treap lock poisoned");
        walk(&root, visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_heap_and_bst(node: &Option<Box<Node>>, prev: &mut Option<Vec<u8>>) {
        let Some(n) = node else { return };
        is_heap_and_bst(&n.left, prev);
        if let Some(p) = prev {
            assert!(p.as_slice() < n.key.as_slice());
        }
        *prev = Some(n.key.clone());
        is_heap_and_bst(&n.right, prev);

        if let Some(l) = &n.left {
            assert!(l.priority <= n.priority, "heap property violated on left child");
        }
        if let Some(r) = &n.right {
            assert!(r.priority <= n.priority, "heap property violated on right child");
        }
    }

    #[test]
    fn maintains_bst_and_heap_invariants() {
        let t = TreapMemTable::new();
        for k in [b"f", b"b", b"c", b"d", b"a", b"h", b"e", b"g"] {
            t.upsert(k, b"v");
        }
        t.upsert(b"f", b"rewritten");

        let root = t.root.read().unwrap();
        let mut prev = None;
        is_heap_and_bst(&root, &mut prev);
        drop(root);

        assert_eq!(t.get(b"f").0, b"rewritten");
    }

    #[test]
    fn update_in_place_does_not_duplicate() {
        let t = TreapMemTable::new();
        t.upsert(b"k", b"1");
        t.upsert(b"k", b"2");
        t.upsert(b"k", b"3");

        let mut count = 0;
        t.traverse(&mut |_, _| count += 1);
        assert_eq!(count, 1);
        assert_eq!(t.get(b"k").0, b"3");
    }

    #[test]
    fn large_random_insert_every_key_retrievable() {
        use std::collections::HashSet;
        let t = TreapMemTable::new();
        let mut rng = rand::thread_rng();
        let mut keys = HashSet::new();

        while keys.len() < 20_000 {
            let k: [u8; 3] = rng.gen();
            if keys.insert(k) {
                t.upsert(&k, b"v");
            }
        }

        for k in &keys {
            assert!(t.get(k).1);
        }
    }
}
