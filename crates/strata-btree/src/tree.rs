//! Order-parameterised B-tree core.
//!
//! The algorithm is generic over the [`Node`] contract, so the same code
//! drives both the in-memory backing and the persistent backing. All
//! rebalancing is expressed through sequence views: a split, merge, or
//! rotation builds new key/value/child views and hands them to
//! `Node::update`, which materialises and (for the persistent backing)
//! writes them through the store.
//!
//! Derived bounds for order `O`:
//! - min non-leaf children = ceil(O/2), max non-leaf children = O
//! - min leaf keys = ceil(O/2) - 1, max leaf keys = O - 1
//!
//! The root is exempt from the minima. Every mutation re-checks the size
//! relations; a violation surfaces as `InvariantViolation` and aborts the
//! operation.

use std::cmp::Ordering;
use std::marker::PhantomData;

use strata_common::{Result, StrataError};
use tracing::trace;

use crate::cmp::Comparator;
use crate::cursor::{Cursor, Frame};
use crate::node::Node;
use crate::seq::Seq;

/// Rounds `n / 2` upwards.
pub(crate) fn ceil_half(n: usize) -> usize {
    (n / 2) + (n % 2)
}

struct Lub {
    i: usize,
    exact: bool,
}

struct SplitResult<K, V, N> {
    sibling: N,
    key: K,
    value: V,
}

struct Popped<K, V> {
    key: K,
    value: V,
    underflow: bool,
}

/// B-tree algorithm over any [`Node`] backing.
pub struct BTreeCore<K, V, C, N> {
    min_non_leaf_children: usize,
    max_non_leaf_children: usize,
    min_leaf_keys: usize,
    max_leaf_keys: usize,
    root: N,
    comparator: C,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, N> BTreeCore<K, V, C, N>
where
    K: Clone + 'static,
    V: Clone + 'static,
    C: Comparator<K>,
    N: Node<K, V>,
{
    /// Creates a tree of the given order over an existing root node.
    ///
    /// The minimum sensible order is 3.
    pub fn new(order: usize, root: N, comparator: C) -> Result<Self> {
        if order < 3 {
            return Err(StrataError::InvalidParameter {
                name: "order".to_string(),
                value: order.to_string(),
            });
        }
        let min_non_leaf_children = ceil_half(order);
        Ok(Self {
            min_non_leaf_children,
            max_non_leaf_children: order,
            // leaf bounds need not relate to the non-leaf bounds; keeping
            // them in lockstep is simply the convention here
            min_leaf_keys: min_non_leaf_children - 1,
            max_leaf_keys: order - 1,
            root,
            comparator,
            _marker: PhantomData,
        })
    }

    /// The root node.
    pub fn root(&self) -> &N {
        &self.root
    }

    /// The comparator supplied at construction.
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Total number of keys in the tree.
    pub fn len(&self, cx: &mut N::Cx) -> Result<usize> {
        let root = self.root.clone();
        self.node_len(cx, &root)
    }

    fn node_len(&self, cx: &mut N::Cx, node: &N) -> Result<usize> {
        let mut n = node.keys().len();
        let children = node.children();
        for i in 0..children.len() {
            let child = N::load(cx, &children.get(i))?;
            n += self.node_len(cx, &child)?;
        }
        Ok(n)
    }

    fn find_lub(&self, node: &N, key: &K) -> Lub {
        let keys = node.keys();
        let n = keys.len();
        for i in 0..n {
            match self.comparator.compare(key, &keys.get(i)) {
                Ordering::Less => return Lub { i, exact: false },
                Ordering::Equal => return Lub { i, exact: true },
                Ordering::Greater => {}
            }
        }
        Lub { i: n, exact: false }
    }

    /// Looks up a key.
    pub fn find(&self, cx: &mut N::Cx, key: &K) -> Result<Option<V>> {
        let mut node = self.root.clone();
        loop {
            let lub = self.find_lub(&node, key);
            if lub.exact {
                return Ok(Some(node.values().get(lub.i)));
            }
            if node.is_leaf() {
                return Ok(None);
            }
            node = N::load(cx, &node.children().get(lub.i))?;
        }
    }

    /// Inserts or replaces a key.
    pub fn put(&mut self, cx: &mut N::Cx, key: K, value: V) -> Result<()> {
        let mut root = self.root.clone();
        if let Some(split) = self.put_in(cx, &mut root, true, key, value)? {
            // The root's external identity must survive the split: clone
            // the root's current content into a fresh sibling, then point
            // the root at the promoted key and the two halves.
            trace!("root split");
            let old_root =
                root.create_sibling(cx, root.keys(), root.values(), root.children())?;
            let keys = Seq::unit(split.key);
            let values = Seq::unit(split.value);
            let children =
                Seq::from_vec(vec![split.sibling.child_ref(), old_root.child_ref()]);
            root.update(cx, keys, values, children)?;
        }
        self.root = root;
        Ok(())
    }

    fn put_in(
        &self,
        cx: &mut N::Cx,
        node: &mut N,
        is_root: bool,
        key: K,
        value: V,
    ) -> Result<Option<SplitResult<K, V, N>>> {
        let lub = self.find_lub(node, &key);
        if lub.exact {
            // just swap the value in place
            let keys = node.keys();
            let values = node.values().with(lub.i, value);
            let children = node.children();
            node.update(cx, keys, values, children)?;
            return Ok(None);
        }
        if node.is_leaf() {
            return self.put_at(cx, node, is_root, key, value, None, lub.i);
        }
        let mut child = N::load(cx, &node.children().get(lub.i))?;
        match self.put_in(cx, &mut child, false, key, value)? {
            None => Ok(None),
            Some(split) => {
                self.put_at(cx, node, is_root, split.key, split.value, Some(split.sibling), lub.i)
            }
        }
    }

    fn put_at(
        &self,
        cx: &mut N::Cx,
        node: &mut N,
        is_root: bool,
        key: K,
        value: V,
        child: Option<N>,
        i: usize,
    ) -> Result<Option<SplitResult<K, V, N>>> {
        let new_keys = node.keys().splice_in(i, key);
        let new_values = node.values().splice_in(i, value);
        match child {
            None => {
                if new_keys.len() > self.max_leaf_keys {
                    return self
                        .split_node(cx, node, new_keys, new_values, None, self.min_leaf_keys)
                        .map(Some);
                }
                self.check_sizes_leaf(is_root, &new_keys, &new_values, 0)?;
                node.update(cx, new_keys, new_values, Seq::empty())?;
                Ok(None)
            }
            Some(sibling) => {
                let new_children = node.children().splice_in(i, sibling.child_ref());
                if new_children.len() > self.max_non_leaf_children {
                    return self
                        .split_node(
                            cx,
                            node,
                            new_keys,
                            new_values,
                            Some(new_children),
                            self.min_non_leaf_children - 1,
                        )
                        .map(Some);
                }
                self.check_sizes_non_leaf(is_root, &new_keys, &new_values, new_children.len())?;
                node.update(cx, new_keys, new_values, new_children)?;
                Ok(None)
            }
        }
    }

    fn split_node(
        &self,
        cx: &mut N::Cx,
        node: &mut N,
        keys: Seq<K>,
        values: Seq<V>,
        children: Option<Seq<N::ChildRef>>,
        median: usize,
    ) -> Result<SplitResult<K, V, N>> {
        let sib_keys = keys.slice_to(median);
        let my_keys = keys.slice_from(median + 1);
        let sib_values = values.slice_to(median);
        let my_values = values.slice_from(median + 1);
        let (sib_children, my_children) = match &children {
            None => {
                self.check_sizes_leaf(false, &sib_keys, &sib_values, 0)?;
                self.check_sizes_leaf(false, &my_keys, &my_values, 0)?;
                (Seq::empty(), Seq::empty())
            }
            Some(cs) => {
                let sib = cs.slice_to(median + 1);
                let mine = cs.slice_from(median + 1);
                self.check_sizes_non_leaf(false, &sib_keys, &sib_values, sib.len())?;
                self.check_sizes_non_leaf(false, &my_keys, &my_values, mine.len())?;
                (sib, mine)
            }
        };
        let sibling = node.create_sibling(cx, sib_keys, sib_values, sib_children)?;
        node.update(cx, my_keys, my_values, my_children)?;
        Ok(SplitResult {
            sibling,
            key: keys.get(median),
            value: values.get(median),
        })
    }

    /// Removes a key; a no-op if the key is absent.
    pub fn remove(&mut self, cx: &mut N::Cx, key: &K) -> Result<()> {
        let mut root = self.root.clone();
        self.remove_in(cx, &mut root, key, true)?;
        if root.child_count() == 1 {
            // collapse: the root adopts its only child's content
            let child = N::load(cx, &root.children().get(0))?;
            let keys = child.keys();
            let values = child.values();
            let children = child.children();
            root.update(cx, keys, values, children)?;
        }
        self.root = root;
        Ok(())
    }

    // returns true if the node underflowed
    fn remove_in(&self, cx: &mut N::Cx, node: &mut N, key: &K, is_root: bool) -> Result<bool> {
        let lub = self.find_lub(node, key);
        if node.is_leaf() {
            if !lub.exact {
                // key wasn't there; no re-balancing needed either
                return Ok(false);
            }
            let keys = node.keys().splice_out(lub.i);
            let values = node.values().splice_out(lub.i);
            node.update(cx, keys, values, Seq::empty())?;
            return Ok(node.keys().len() < self.min_leaf_keys);
        }
        let mut left = N::load(cx, &node.children().get(lub.i))?;
        if lub.exact {
            // replace the separator by its predecessor, popped from the
            // left subtree
            let popped = self.pop_rightmost(cx, &mut left)?;
            let keys = node.keys().with(lub.i, popped.key);
            let values = node.values().with(lub.i, popped.value);
            let children = node.children();
            node.update(cx, keys, values, children)?;
            if popped.underflow {
                self.fix_underflow(cx, node, lub.i, is_root)
            } else {
                Ok(false)
            }
        } else {
            let underflow = self.remove_in(cx, &mut left, key, false)?;
            if underflow {
                self.fix_underflow(cx, node, lub.i, is_root)
            } else {
                Ok(false)
            }
        }
    }

    fn pop_rightmost(&self, cx: &mut N::Cx, node: &mut N) -> Result<Popped<K, V>> {
        if node.is_leaf() {
            let n = node.keys().len() - 1;
            let key = node.keys().get(n);
            let value = node.values().get(n);
            let keys = node.keys().slice_to(n);
            let values = node.values().slice_to(n);
            node.update(cx, keys, values, Seq::empty())?;
            return Ok(Popped {
                key,
                value,
                underflow: node.keys().len() < self.min_leaf_keys,
            });
        }
        let i = node.child_count() - 1;
        let mut last = N::load(cx, &node.children().get(i))?;
        let popped = self.pop_rightmost(cx, &mut last)?;
        if popped.underflow {
            let underflow = self.fix_underflow(cx, node, i, false)?;
            Ok(Popped {
                key: popped.key,
                value: popped.value,
                underflow,
            })
        } else {
            Ok(popped)
        }
    }

    // returns true if the underflow propagated to `node` itself
    fn fix_underflow(&self, cx: &mut N::Cx, node: &mut N, i: usize, is_root: bool) -> Result<bool> {
        let child = N::load(cx, &node.children().get(i))?;
        if child.is_leaf() && child.keys().len() >= self.min_leaf_keys {
            return Err(StrataError::InvariantViolation(
                "no underflow at leaf".to_string(),
            ));
        }
        if !child.is_leaf() && child.child_count() >= self.min_non_leaf_children {
            return Err(StrataError::InvariantViolation(
                "no underflow at internal node".to_string(),
            ));
        }
        let has_left_sibling = i > 0;
        if has_left_sibling {
            let left = N::load(cx, &node.children().get(i - 1))?;
            if self.has_spare(&left) {
                self.rotate_clockwise(cx, node, i - 1)?;
                return Ok(false);
            }
        }
        let has_right_sibling = i + 1 < node.child_count();
        if has_right_sibling {
            let right = N::load(cx, &node.children().get(i + 1))?;
            if self.has_spare(&right) {
                self.rotate_counter_clockwise(cx, node, i)?;
                return Ok(false);
            }
        }
        if has_left_sibling {
            return self.merge_children(cx, node, i - 1, is_root);
        }
        if has_right_sibling {
            return self.merge_children(cx, node, i, is_root);
        }
        if is_root {
            // nothing we can do
            return Ok(true);
        }
        Err(StrataError::InvariantViolation(
            "non-root node with a single child".to_string(),
        ))
    }

    fn has_spare(&self, node: &N) -> bool {
        if node.is_leaf() {
            node.keys().len() > self.min_leaf_keys
        } else {
            node.child_count() > self.min_non_leaf_children
        }
    }

    // child i       k/v i      child i + 1
    //      \          |        /
    //       \         c       /                     b
    //       (... a b)   (d ...)   ------>   (... a)   (c d ...)
    fn rotate_clockwise(&self, cx: &mut N::Cx, node: &mut N, i: usize) -> Result<()> {
        let mut left = N::load(cx, &node.children().get(i))?;
        let mut right = N::load(cx, &node.children().get(i + 1))?;
        let b_key = left.keys().last();
        let b_value = left.values().last();
        let b_child = (!left.is_leaf()).then(|| left.children().last());
        let c_key = node.keys().get(i);
        let c_value = node.values().get(i);

        let left_keys = left.keys().without_last();
        let left_values = left.values().without_last();
        let left_children = if left.is_leaf() {
            Seq::empty()
        } else {
            left.children().without_last()
        };
        left.update(cx, left_keys, left_values, left_children)?;

        let right_keys = Seq::unit(c_key).concat(&right.keys());
        let right_values = Seq::unit(c_value).concat(&right.values());
        let right_children = match (right.is_leaf(), b_child) {
            (true, _) => Seq::empty(),
            (false, Some(c)) => Seq::unit(c).concat(&right.children()),
            (false, None) => {
                return Err(StrataError::InvariantViolation(
                    "rotation between a leaf and an internal node".to_string(),
                ))
            }
        };
        right.update(cx, right_keys, right_values, right_children)?;

        let keys = node.keys().with(i, b_key);
        let values = node.values().with(i, b_value);
        let children = node.children();
        node.update(cx, keys, values, children)
    }

    // child i      k/v i        child i + 1
    //       \        |          /
    //        \       b         /                       c
    //        (... a)   (c d ...)   ------>   (... a b)   (d ...)
    fn rotate_counter_clockwise(&self, cx: &mut N::Cx, node: &mut N, i: usize) -> Result<()> {
        let mut left = N::load(cx, &node.children().get(i))?;
        let mut right = N::load(cx, &node.children().get(i + 1))?;
        let b_key = node.keys().get(i);
        let b_value = node.values().get(i);
        let c_key = right.keys().first();
        let c_value = right.values().first();
        let c_child = (!right.is_leaf()).then(|| right.children().first());

        let left_keys = left.keys().concat(&Seq::unit(b_key));
        let left_values = left.values().concat(&Seq::unit(b_value));
        let left_children = match (left.is_leaf(), c_child) {
            (true, _) => Seq::empty(),
            (false, Some(c)) => left.children().concat(&Seq::unit(c)),
            (false, None) => {
                return Err(StrataError::InvariantViolation(
                    "rotation between a leaf and an internal node".to_string(),
                ))
            }
        };
        left.update(cx, left_keys, left_values, left_children)?;

        let right_keys = right.keys().without_first();
        let right_values = right.values().without_first();
        let right_children = if right.is_leaf() {
            Seq::empty()
        } else {
            right.children().without_first()
        };
        right.update(cx, right_keys, right_values, right_children)?;

        let keys = node.keys().with(i, c_key);
        let values = node.values().with(i, c_value);
        let children = node.children();
        node.update(cx, keys, values, children)
    }

    // merge the i'th key and (i + 1)'st child of `node` into the i'th
    // child; the parent loses one key and one child
    fn merge_children(&self, cx: &mut N::Cx, node: &mut N, i: usize, is_root: bool) -> Result<bool> {
        trace!("merging children");
        let mut child = N::load(cx, &node.children().get(i))?;
        let right_sibling = N::load(cx, &node.children().get(i + 1))?;
        let key = node.keys().get(i);
        let value = node.values().get(i);
        let merged_keys = child
            .keys()
            .concat(&Seq::unit(key))
            .concat(&right_sibling.keys());
        let merged_values = child
            .values()
            .concat(&Seq::unit(value))
            .concat(&right_sibling.values());
        let merged_children = if child.is_leaf() {
            self.check_sizes_leaf(is_root, &merged_keys, &merged_values, 0)?;
            Seq::empty()
        } else {
            let cs = child.children().concat(&right_sibling.children());
            self.check_sizes_non_leaf(is_root, &merged_keys, &merged_values, cs.len())?;
            cs
        };
        child.update(cx, merged_keys, merged_values, merged_children)?;

        let new_keys = node.keys().splice_out(i);
        let new_values = node.values().splice_out(i);
        let new_children = node.children().splice_out(i + 1);
        if new_values.len() != new_keys.len() {
            return Err(StrataError::InvariantViolation(
                "wrong number of values".to_string(),
            ));
        }
        if new_children.len() > self.max_non_leaf_children {
            return Err(StrataError::InvariantViolation(format!(
                "wrong number of children: expected {} to {}, got {}",
                self.min_non_leaf_children,
                self.max_non_leaf_children,
                new_children.len()
            )));
        }
        if new_children.len() != new_keys.len() + 1 {
            return Err(StrataError::InvariantViolation(
                "wrong number of children".to_string(),
            ));
        }
        let underflow = new_children.len() < self.min_non_leaf_children;
        node.update(cx, new_keys, new_values, new_children)?;
        Ok(underflow)
    }

    fn check_sizes_leaf(
        &self,
        is_root: bool,
        keys: &Seq<K>,
        values: &Seq<V>,
        child_count: usize,
    ) -> Result<()> {
        if values.len() != keys.len() {
            return Err(StrataError::InvariantViolation(
                "wrong number of values".to_string(),
            ));
        }
        if !is_root && (keys.len() < self.min_leaf_keys || keys.len() > self.max_leaf_keys) {
            return Err(StrataError::InvariantViolation(
                "wrong number of keys".to_string(),
            ));
        }
        if child_count != 0 {
            return Err(StrataError::InvariantViolation(
                "wrong number of children".to_string(),
            ));
        }
        Ok(())
    }

    fn check_sizes_non_leaf(
        &self,
        is_root: bool,
        keys: &Seq<K>,
        values: &Seq<V>,
        child_count: usize,
    ) -> Result<()> {
        if values.len() != keys.len() {
            return Err(StrataError::InvariantViolation(
                "wrong number of values".to_string(),
            ));
        }
        if !is_root
            && (child_count < self.min_non_leaf_children
                || child_count > self.max_non_leaf_children)
        {
            return Err(StrataError::InvariantViolation(format!(
                "wrong number of children: expected {} to {}, got {}",
                self.min_non_leaf_children, self.max_non_leaf_children, child_count
            )));
        }
        if child_count != keys.len() + 1 {
            return Err(StrataError::InvariantViolation(
                "wrong number of children".to_string(),
            ));
        }
        Ok(())
    }

    /// In-order traversal over `(key, value)` pairs.
    pub fn for_each<F: FnMut(&K, &V)>(&self, cx: &mut N::Cx, f: &mut F) -> Result<()> {
        let root = self.root.clone();
        self.for_each_in(cx, &root, f)
    }

    fn for_each_in<F: FnMut(&K, &V)>(&self, cx: &mut N::Cx, node: &N, f: &mut F) -> Result<()> {
        let n = node.keys().len();
        for i in 0..n {
            if !node.is_leaf() {
                let child = N::load(cx, &node.children().get(i))?;
                self.for_each_in(cx, &child, f)?;
            }
            let key = node.keys().get(i);
            let value = node.values().get(i);
            f(&key, &value);
        }
        if !node.is_leaf() {
            let child = N::load(cx, &node.children().get(n))?;
            self.for_each_in(cx, &child, f)?;
        }
        Ok(())
    }

    /// Cursor positioned at the smallest key; out of tree if the tree is
    /// empty.
    pub fn cursor(&self, cx: &mut N::Cx) -> Result<Cursor<K, V, N>> {
        let mut stack = Vec::new();
        let mut node = self.root.clone();
        while !node.is_leaf() {
            let child = N::load(cx, &node.children().get(0))?;
            stack.push(Frame::new(node, 0));
            node = child;
        }
        if node.keys().is_empty() {
            // only an empty root leaf can get here
            return Ok(Cursor::new(Vec::new()));
        }
        stack.push(Frame::new(node, 0));
        Ok(Cursor::new(stack))
    }

    /// Cursor positioned at the least key >= `key`, or out of tree when no
    /// such key exists.
    pub fn cursor_from(&self, cx: &mut N::Cx, key: &K) -> Result<Cursor<K, V, N>> {
        let mut stack: Vec<Frame<N>> = Vec::new();
        let root = self.root.clone();
        let lub = self.find_lub(&root, key);
        if root.is_leaf() && lub.i == root.keys().len() {
            return Ok(Cursor::new(Vec::new()));
        }
        let exact = lub.exact;
        stack.push(Frame::new(root, lub.i));
        if exact {
            return Ok(Cursor::new(stack));
        }
        loop {
            let (parent, i) = match stack.last() {
                Some(top) if !top.node.is_leaf() => (top.node.clone(), top.i),
                _ => break,
            };
            let child = N::load(cx, &parent.children().get(i))?;
            let lub = self.find_lub(&child, key);
            if child.is_leaf() && lub.i == child.keys().len() {
                // the least upper bound lives in an ancestor; position one
                // past the last key and step right once
                stack.push(Frame::new(child, lub.i - 1));
                let mut cursor = Cursor::new(stack);
                cursor.move_right(cx)?;
                return Ok(cursor);
            }
            let exact = lub.exact;
            stack.push(Frame::new(child, lub.i));
            if exact {
                break;
            }
        }
        Ok(Cursor::new(stack))
    }

    /// Verifies key order and uniform leaf depth over the whole tree.
    /// Intended for tests; failures indicate a bug.
    pub fn check_invariants(&self, cx: &mut N::Cx) -> Result<()> {
        let root = self.root.clone();
        self.check_leaf_depth(cx, &root)?;
        self.check_key_order(cx, &root, None, None)
    }

    fn check_key_order(
        &self,
        cx: &mut N::Cx,
        node: &N,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<()> {
        let keys = node.keys();
        let n = keys.len();
        for i in 0..n {
            let k = keys.get(i);
            let below_lower =
                lower.is_some_and(|lb| self.comparator.compare(&k, lb) == Ordering::Less);
            let at_or_above_upper =
                upper.is_some_and(|ub| self.comparator.compare(&k, ub) != Ordering::Less);
            if below_lower || at_or_above_upper {
                return Err(StrataError::InvariantViolation("wrong order".to_string()));
            }
        }
        if !node.is_leaf() {
            for i in 0..=n {
                let child = N::load(cx, &node.children().get(i))?;
                let lower_i = if i > 0 { Some(keys.get(i - 1)) } else { None };
                let upper_i = if i < n { Some(keys.get(i)) } else { None };
                self.check_key_order(cx, &child, lower_i.as_ref(), upper_i.as_ref())?;
            }
        }
        Ok(())
    }

    fn check_leaf_depth(&self, cx: &mut N::Cx, node: &N) -> Result<usize> {
        if node.is_leaf() {
            return Ok(0);
        }
        let children = node.children();
        let first = N::load(cx, &children.get(0))?;
        let depth = self.check_leaf_depth(cx, &first)?;
        for i in 1..children.len() {
            let child = N::load(cx, &children.get(i))?;
            if self.check_leaf_depth(cx, &child)? != depth {
                return Err(StrataError::InvariantViolation(
                    "not all leaves are at the same depth".to_string(),
                ));
            }
        }
        Ok(depth + 1)
    }
}
