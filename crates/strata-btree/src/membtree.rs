//! In-memory B-tree harness.
//!
//! Same algorithm as the persistent tree, backed by heap nodes. Used to
//! exercise the tree core exhaustively without a store, and useful in its
//! own right as an ordered map with a pluggable comparator.

use std::fmt::Display;

use strata_common::Result;

use crate::cmp::{Comparator, Natural};
use crate::cursor::Cursor;
use crate::node::{MemNode, Node};
use crate::tree::BTreeCore;

/// Order-parameterised in-memory B-tree.
pub struct MemBTree<K, V, C = Natural>
where
    K: Clone + 'static,
    V: Clone + 'static,
    C: Comparator<K>,
{
    order: usize,
    tree: BTreeCore<K, V, C, MemNode<K, V>>,
}

impl<K, V> MemBTree<K, V, Natural>
where
    K: Clone + Ord + 'static,
    V: Clone + 'static,
{
    /// Creates an empty tree ordered by the key type's `Ord`.
    pub fn new(order: usize) -> Result<Self> {
        Self::with_comparator(order, Natural)
    }
}

impl<K, V, C> MemBTree<K, V, C>
where
    K: Clone + 'static,
    V: Clone + 'static,
    C: Comparator<K> + Clone,
{
    /// Creates an empty tree with the given comparator.
    pub fn with_comparator(order: usize, comparator: C) -> Result<Self> {
        Self::with_root(order, comparator, MemNode::empty())
    }

    pub(crate) fn with_root(order: usize, comparator: C, root: MemNode<K, V>) -> Result<Self> {
        Ok(Self {
            order,
            tree: BTreeCore::new(order, root, comparator)?,
        })
    }

    /// Total number of keys.
    pub fn len(&self) -> Result<usize> {
        self.tree.len(&mut ())
    }

    /// True if the tree holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Looks up a key.
    pub fn find(&self, key: &K) -> Result<Option<V>> {
        self.tree.find(&mut (), key)
    }

    /// Inserts or replaces a key.
    pub fn put(&mut self, key: K, value: V) -> Result<()> {
        self.tree.put(&mut (), key, value)
    }

    /// Removes a key; a no-op if absent.
    pub fn remove(&mut self, key: &K) -> Result<()> {
        self.tree.remove(&mut (), key)
    }

    /// In-order traversal.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) -> Result<()> {
        self.tree.for_each(&mut (), &mut f)
    }

    /// Cursor at the smallest key.
    pub fn cursor(&self) -> Result<Cursor<K, V, MemNode<K, V>>> {
        self.tree.cursor(&mut ())
    }

    /// Cursor at the least key >= `key`.
    pub fn cursor_from(&self, key: &K) -> Result<Cursor<K, V, MemNode<K, V>>> {
        self.tree.cursor_from(&mut (), key)
    }

    /// Verifies the structural invariants; for tests.
    pub fn check_invariants(&self) -> Result<()> {
        self.tree.check_invariants(&mut ())
    }

    /// Deep copy of the whole tree.
    pub fn copy(&self) -> Result<Self> {
        Self::with_root(
            self.order,
            self.tree.comparator().clone(),
            self.tree.root().deep_clone(),
        )
    }

    pub(crate) fn root_node(&self) -> MemNode<K, V> {
        self.tree.root().clone()
    }
}

impl<K, V, C> MemBTree<K, V, C>
where
    K: Clone + Display + 'static,
    V: Clone + 'static,
    C: Comparator<K> + Clone,
{
    /// Renders the tree structure as nested parentheses, for debugging.
    pub fn sketch(&self) -> String {
        let mut out = String::new();
        sketch_node(&self.root_node(), &mut out);
        out
    }
}

fn sketch_node<K, V>(node: &MemNode<K, V>, out: &mut String)
where
    K: Clone + Display + 'static,
    V: Clone + 'static,
{
    out.push('(');
    let keys = node.keys();
    let n = keys.len();
    for i in 0..n {
        if i > 0 {
            out.push(' ');
        }
        if !node.is_leaf() {
            sketch_node(&node.children().get(i), out);
            out.push(' ');
        }
        out.push_str(&keys.get(i).to_string());
    }
    if !node.is_leaf() {
        out.push(' ');
        sketch_node(&node.children().get(n), out);
    }
    out.push(')');
}
