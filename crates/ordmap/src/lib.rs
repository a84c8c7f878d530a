//! A balanced ordered multiset (2-3 tree) with neighbour queries.
//!
//! This is the leaf-level building block used by [`binrepr`](https://docs.rs/binrepr)
//! to keep its chunks sorted by offset, but it is generic enough to back any
//! sorted collection that needs `find`/`predecessor`/`successor` in `O(log n)`.
//!
//! Keys are stored at the leaves; internal nodes carry routing copies of the
//! smallest key in their right subtree. Duplicate keys are allowed and are
//! kept in insertion order among themselves (stable).

use std::cmp::Ordering;
use std::mem;

const MAX_LEAF: usize = 3;
const MAX_CHILDREN: usize = 3;

#[derive(Debug, Clone)]
enum Node<T> {
    Leaf(Vec<T>),
    Internal { keys: Vec<T>, children: Vec<Node<T>> },
}

/// A split produced by an overflowing node: a routing key and the new right
/// sibling to be inserted into the parent.
struct Split<T>(T, Node<T>);

impl<T: Ord + Clone> Node<T> {
    fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Internal { children, .. } => 1 + children[0].depth(),
        }
    }

    fn child_index(keys: &[T], key: &T) -> usize {
        // first child whose subtree may hold `key`: children[i] holds keys < keys[i]
        // for i in 0..keys.len(), and children[last] holds the rest.
        keys.iter().position(|k| key < k).unwrap_or(keys.len())
    }

    fn insert(&mut self, key: T) -> Option<Split<T>> {
        match self {
            Node::Leaf(items) => {
                let pos = items.iter().position(|k| *k > key).unwrap_or(items.len());
                items.insert(pos, key);
                if items.len() <= MAX_LEAF {
                    return None;
                }
                // split 4 leaf items into 2 + 2, promoting a routing copy of
                // the right half's minimum.
                let right = items.split_off(2);
                let sep = right[0].clone();
                Some(Split(sep, Node::Leaf(right)))
            }
            Node::Internal { keys, children } => {
                let i = Self::child_index(keys, &key);
                let split = children[i].insert(key);
                let Some(Split(sep, new_child)) = split else {
                    return None;
                };
                keys.insert(i, sep);
                children.insert(i + 1, new_child);
                if children.len() <= MAX_CHILDREN {
                    return None;
                }
                // children.len() == 4, keys.len() == 3: split into two 2-children nodes,
                // promoting the middle key (keys[1]) to the parent.
                let right_children = children.split_off(2);
                let right_keys = keys.split_off(2);
                let sep = keys.pop().expect("3 keys before split");
                Some(Split(
                    sep,
                    Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                ))
            }
        }
    }

    fn find<'a>(&'a self, key: &T) -> Option<&'a T> {
        match self {
            Node::Leaf(items) => items.iter().find(|k| *k == key),
            Node::Internal { keys, children } => {
                let i = Self::child_index(keys, key);
                children[i].find(key)
            }
        }
    }

    fn predecessor<'a>(&'a self, key: &T, best: &mut Option<&'a T>) {
        match self {
            Node::Leaf(items) => {
                for item in items.iter() {
                    if item <= key && best.is_none_or(|b| item > b) {
                        *best = Some(item);
                    }
                }
            }
            Node::Internal { keys, children } => {
                let i = Self::child_index(keys, key);
                // The candidate subtree is children[i]; if it holds nothing
                // `<= key` (can happen since routing keys only approximate
                // subtree minima), fall back leftward sibling by sibling.
                let mut j = i as isize;
                while j >= 0 && best.is_none() {
                    children[j as usize].predecessor(key, best);
                    j -= 1;
                }
            }
        }
    }

    fn successor<'a>(&'a self, key: &T, best: &mut Option<&'a T>) {
        match self {
            Node::Leaf(items) => {
                for item in items.iter() {
                    if item > key && best.is_none_or(|b| item < b) {
                        *best = Some(item);
                    }
                }
            }
            Node::Internal { keys, children } => {
                let i = Self::child_index(keys, key);
                let mut j = i;
                while j < children.len() && best.is_none() {
                    children[j].successor(key, best);
                    j += 1;
                }
            }
        }
    }

    fn iterate_into<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Node::Leaf(items) => out.extend(items.iter()),
            Node::Internal { children, .. } => {
                for c in children {
                    c.iterate_into(out);
                }
            }
        }
    }

    fn iterate_into_owned(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        self.iterate_owned(&mut out);
        out
    }

    fn iterate_owned(&self, out: &mut Vec<T>) {
        match self {
            Node::Leaf(items) => out.extend(items.iter().cloned()),
            Node::Internal { children, .. } => {
                for c in children {
                    c.iterate_owned(out);
                }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Node::Leaf(items) => items.len(),
            Node::Internal { children, .. } => children.iter().map(Node::len).sum(),
        }
    }
}

/// A 2-3 tree: a balanced ordered multiset supporting `O(log n)` membership
/// and neighbour queries, plus full in-order iteration.
#[derive(Debug, Clone)]
pub struct OrdMap<T> {
    root: Node<T>,
    len: usize,
}

impl<T: Ord + Clone> Default for OrdMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> OrdMap<T> {
    pub fn new() -> Self {
        Self {
            root: Node::Leaf(Vec::new()),
            len: 0,
        }
    }

    /// Number of elements currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `key`, preserving stable order among equal keys.
    pub fn insert(&mut self, key: T) {
        self.insert_raw(key);
        self.len += 1;
    }

    /// The stored element equal to `key`, if any.
    pub fn find(&self, key: &T) -> Option<&T> {
        self.root.find(key)
    }

    /// The greatest stored element `<= key`.
    pub fn predecessor(&self, key: &T) -> Option<&T> {
        let mut best = None;
        self.root.predecessor(key, &mut best);
        best
    }

    /// The least stored element `> key`.
    pub fn successor(&self, key: &T) -> Option<&T> {
        let mut best = None;
        self.root.successor(key, &mut best);
        best
    }

    /// All elements in ascending order.
    pub fn iterate(&self) -> impl Iterator<Item = &T> {
        let mut out = Vec::with_capacity(self.len);
        self.root.iterate_into(&mut out);
        out.into_iter()
    }

    /// Current tree height (number of levels from root to leaf, inclusive).
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Remove one element equal to `key`, if present.
    ///
    /// Not required by `BinRepr`'s append/split-only usage, but provided for
    /// callers (such as a chunk being rewritten) that need to drop a stale
    /// entry before reinserting an updated one. Rebuilds the tree from the
    /// remaining elements, trading `O(log n)` for a simple, always-balanced
    /// result — the upstream 2-3 tree this is modelled on never exercised a
    /// more incremental removal either.
    pub fn remove(&mut self, key: &T) -> bool {
        let mut items: Vec<T> = self.root.iterate_into_owned();
        let Some(idx) = items.iter().position(|k| k == key) else {
            return false;
        };
        items.remove(idx);
        self.len = items.len();
        self.root = Node::Leaf(Vec::new());
        for item in items {
            self.insert_raw(item);
        }
        true
    }

    fn insert_raw(&mut self, key: T) {
        if let Some(Split(sep, right)) = self.root.insert(key) {
            let old_root = mem::replace(&mut self.root, Node::Leaf(Vec::new()));
            self.root = Node::Internal {
                keys: vec![sep],
                children: vec![old_root, right],
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sorted_insert_all(items: &[i64]) -> OrdMap<i64> {
        let mut m = OrdMap::new();
        for &i in items {
            m.insert(i);
        }
        m
    }

    #[test]
    fn iterate_yields_sorted_order() {
        let m = sorted_insert_all(&[6, 1, 15, 3, 11, 12, 4, 5, 7, 8, 16, 9, 10, 13, 2, 14]);
        let got: Vec<_> = m.iterate().copied().collect();
        let expected: Vec<i64> = (1..=16).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn find_membership() {
        let m = sorted_insert_all(&[6, 1, 15, 3, 11, 12, 4, 5, 7, 8, 16, 9, 10, 13, 2, 14]);
        assert_eq!(m.find(&9), Some(&9));
        assert_eq!(m.find(&42), None);
    }

    #[test]
    fn predecessor_successor_on_missing_key() {
        // S5
        let m = sorted_insert_all(&[6, 1, 15, 3, 11, 12, 4, 5, 7, 8, 16, 9, 10, 13, 2, 14]);
        assert_eq!(m.predecessor(&4).copied(), Some(4));
        assert_eq!(m.successor(&4).copied(), Some(5));
    }

    #[test]
    fn depth_is_logarithmic() {
        let mut m = OrdMap::new();
        for i in 0..1000i64 {
            m.insert(i);
        }
        let n = m.len() as f64;
        let d = m.depth() as f64;
        assert!(d <= n.log2().ceil() + 2.0, "depth {d} too large for n={n}");
    }

    #[rstest]
    #[case(vec![1,2,3,4,5,6,7,8,9,10])]
    #[case(vec![10,9,8,7,6,5,4,3,2,1])]
    #[case(vec![5,5,5,1,1,9,9])]
    fn insert_then_iterate_is_sorted(#[case] items: Vec<i64>) {
        let mut expected = items.clone();
        expected.sort();
        let m = sorted_insert_all(&items);
        let got: Vec<_> = m.iterate().copied().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn stable_duplicates_keep_insertion_order_among_equals() {
        let mut m: OrdMap<(i64, u32)> = OrdMap::new();
        m.insert((1, 0));
        m.insert((1, 1));
        m.insert((1, 2));
        let got: Vec<_> = m.iterate().map(|&(_, tag)| tag).collect();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[test]
    fn remove_drops_one_matching_element() {
        let mut m = sorted_insert_all(&[1, 2, 3, 4, 5]);
        assert!(m.remove(&3));
        assert_eq!(m.iterate().copied().collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert!(!m.remove(&3));
    }

    #[test]
    fn empty_map_queries_return_none() {
        let m: OrdMap<i64> = OrdMap::new();
        assert_eq!(m.find(&1), None);
        assert_eq!(m.predecessor(&1), None);
        assert_eq!(m.successor(&1), None);
        assert_eq!(m.depth(), 1);
    }
}
