//! The node contract the tree core is generic over, plus the in-memory
//! backing.
//!
//! A node exposes its keys and values as sequence views and its children
//! as a sequence of child references. A child reference is a cheap
//! identity — the in-memory node itself, or a store handle for the
//! persistent backing — and is resolved to a full node with [`Node::load`].
//! The `Cx` associated type threads the store transaction through
//! persistent node operations; the in-memory node uses `()`.

use std::cell::RefCell;
use std::rc::Rc;

use strata_common::Result;

use crate::seq::Seq;

/// Polymorphic B-tree node.
pub trait Node<K, V>: Sized + Clone + 'static
where
    K: Clone + 'static,
    V: Clone + 'static,
{
    /// Context threaded through node operations: the store transaction
    /// for persistent nodes, `()` for in-memory nodes.
    type Cx;

    /// Cheap identity of a child node.
    type ChildRef: Clone + 'static;

    /// This node's keys.
    fn keys(&self) -> Seq<K>;

    /// This node's values; always the same length as the keys.
    fn values(&self) -> Seq<V>;

    /// This node's child references: empty for a leaf, one more than the
    /// key count otherwise.
    fn children(&self) -> Seq<Self::ChildRef>;

    /// Number of children.
    fn child_count(&self) -> usize;

    /// Resolves a child reference to a node.
    fn load(cx: &mut Self::Cx, child: &Self::ChildRef) -> Result<Self>;

    /// This node as a child reference.
    fn child_ref(&self) -> Self::ChildRef;

    /// True iff the node has no children.
    fn is_leaf(&self) -> bool {
        self.child_count() == 0
    }

    /// Atomically replaces the node's keys, values, and children, writing
    /// through to any backing store.
    fn update(
        &mut self,
        cx: &mut Self::Cx,
        keys: Seq<K>,
        values: Seq<V>,
        children: Seq<Self::ChildRef>,
    ) -> Result<()>;

    /// Allocates a fresh peer node of the same flavour.
    fn create_sibling(
        &self,
        cx: &mut Self::Cx,
        keys: Seq<K>,
        values: Seq<V>,
        children: Seq<Self::ChildRef>,
    ) -> Result<Self>;
}

struct MemNodeInner<K, V> {
    keys: Seq<K>,
    values: Seq<V>,
    children: Seq<MemNode<K, V>>,
}

/// Heap-backed node for the in-memory tree.
///
/// Nodes are shared: cloning a `MemNode` yields another reference to the
/// same node, so an update through one reference is visible through all.
pub struct MemNode<K, V> {
    inner: Rc<RefCell<MemNodeInner<K, V>>>,
}

impl<K, V> Clone for MemNode<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: Clone + 'static, V: Clone + 'static> MemNode<K, V> {
    /// Creates an empty leaf.
    pub fn empty() -> Self {
        Self::from_parts(Seq::empty(), Seq::empty(), Seq::empty())
    }

    /// Creates a node with the given content, materialising the views.
    pub fn from_parts(keys: Seq<K>, values: Seq<V>, children: Seq<MemNode<K, V>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemNodeInner {
                keys: Seq::from_vec(keys.to_vec()),
                values: Seq::from_vec(values.to_vec()),
                children: Seq::from_vec(children.to_vec()),
            })),
        }
    }

    /// Recursively copies this node and every descendant.
    pub fn deep_clone(&self) -> Self {
        let inner = self.inner.borrow();
        let children = Seq::from_vec(inner.children.iter().map(|c| c.deep_clone()).collect());
        Self {
            inner: Rc::new(RefCell::new(MemNodeInner {
                keys: inner.keys.clone(),
                values: inner.values.clone(),
                children,
            })),
        }
    }
}

impl<K: Clone + 'static, V: Clone + 'static> Node<K, V> for MemNode<K, V> {
    type Cx = ();
    type ChildRef = MemNode<K, V>;

    fn keys(&self) -> Seq<K> {
        self.inner.borrow().keys.clone()
    }

    fn values(&self) -> Seq<V> {
        self.inner.borrow().values.clone()
    }

    fn children(&self) -> Seq<MemNode<K, V>> {
        self.inner.borrow().children.clone()
    }

    fn child_count(&self) -> usize {
        self.inner.borrow().children.len()
    }

    fn load(_cx: &mut (), child: &MemNode<K, V>) -> Result<Self> {
        Ok(child.clone())
    }

    fn child_ref(&self) -> MemNode<K, V> {
        self.clone()
    }

    fn update(
        &mut self,
        _cx: &mut (),
        keys: Seq<K>,
        values: Seq<V>,
        children: Seq<MemNode<K, V>>,
    ) -> Result<()> {
        // materialise the views so updates do not stack lazy layers
        let keys = Seq::from_vec(keys.to_vec());
        let values = Seq::from_vec(values.to_vec());
        let children = Seq::from_vec(children.to_vec());
        let mut inner = self.inner.borrow_mut();
        inner.keys = keys;
        inner.values = values;
        inner.children = children;
        Ok(())
    }

    fn create_sibling(
        &self,
        _cx: &mut (),
        keys: Seq<K>,
        values: Seq<V>,
        children: Seq<MemNode<K, V>>,
    ) -> Result<Self> {
        Ok(MemNode::from_parts(keys, values, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_leaf() {
        let node: MemNode<i32, i32> = MemNode::empty();
        assert!(node.is_leaf());
        assert_eq!(node.keys().len(), 0);
        assert_eq!(node.child_count(), 0);
    }

    #[test]
    fn test_update_visible_through_clones() {
        let mut node: MemNode<i32, i32> = MemNode::empty();
        let alias = node.clone();
        node.update(
            &mut (),
            Seq::from_vec(vec![1, 2]),
            Seq::from_vec(vec![10, 20]),
            Seq::empty(),
        )
        .unwrap();
        assert_eq!(alias.keys().to_vec(), vec![1, 2]);
        assert_eq!(alias.values().to_vec(), vec![10, 20]);
    }

    #[test]
    fn test_create_sibling_is_detached() {
        let node: MemNode<i32, i32> = MemNode::empty();
        let mut sib = node
            .create_sibling(
                &mut (),
                Seq::unit(5),
                Seq::unit(50),
                Seq::empty(),
            )
            .unwrap();
        sib.update(&mut (), Seq::unit(6), Seq::unit(60), Seq::empty())
            .unwrap();
        assert_eq!(node.keys().len(), 0);
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let leaf: MemNode<i32, i32> = MemNode::from_parts(
            Seq::unit(1),
            Seq::unit(10),
            Seq::empty(),
        );
        let root: MemNode<i32, i32> = MemNode::from_parts(
            Seq::empty(),
            Seq::empty(),
            Seq::unit(leaf.clone()),
        );
        let copy = root.deep_clone();
        let mut leaf_in_copy = copy.children().get(0);
        leaf_in_copy
            .update(&mut (), Seq::unit(9), Seq::unit(90), Seq::empty())
            .unwrap();
        assert_eq!(leaf.keys().to_vec(), vec![1]);
    }
}
