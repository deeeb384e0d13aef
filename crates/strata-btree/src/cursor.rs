//! Stateful in-order traversal.
//!
//! A cursor is a stack of `(node, index)` frames. For a leaf frame the
//! index addresses the key currently yielded; for an internal frame it is
//! the separator index reached after the current sub-descent. Cursors are
//! scoped to one transaction: they never restart it, and mutating the tree
//! through another path while a cursor is live is undefined.

use std::marker::PhantomData;

use strata_common::Result;

use crate::node::Node;

pub(crate) struct Frame<N> {
    pub(crate) node: N,
    pub(crate) i: usize,
}

impl<N> Frame<N> {
    pub(crate) fn new(node: N, i: usize) -> Self {
        Self { node, i }
    }
}

/// In-order cursor over a B-tree.
pub struct Cursor<K, V, N> {
    stack: Vec<Frame<N>>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, N> Cursor<K, V, N>
where
    K: Clone + 'static,
    V: Clone + 'static,
    N: Node<K, V>,
{
    pub(crate) fn new(stack: Vec<Frame<N>>) -> Self {
        Self {
            stack,
            _marker: PhantomData,
        }
    }

    fn can_move_right(frame: &Frame<N>) -> bool {
        let limit = if frame.node.is_leaf() {
            frame.node.keys().len()
        } else {
            frame.node.child_count()
        };
        frame.i + 1 < limit
    }

    /// True while the cursor points at a key.
    pub fn in_tree(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The current key, or None when out of tree.
    pub fn key(&self) -> Option<K> {
        self.stack.last().map(|f| f.node.keys().get(f.i))
    }

    /// The current value, or None when out of tree.
    pub fn value(&self) -> Option<V> {
        self.stack.last().map(|f| f.node.values().get(f.i))
    }

    /// Advances to the next key in order; a cursor that runs off the last
    /// key leaves the tree.
    pub fn move_right(&mut self, cx: &mut N::Cx) -> Result<()> {
        let can = match self.stack.last() {
            None => return Ok(()),
            Some(top) => Self::can_move_right(top),
        };
        if can {
            let mut descend = None;
            if let Some(top) = self.stack.last_mut() {
                top.i += 1;
                if !top.node.is_leaf() {
                    descend = Some((top.node.clone(), top.i));
                }
            }
            if let Some((mut node, mut i)) = descend {
                loop {
                    let child = N::load(cx, &node.children().get(i))?;
                    let leaf = child.is_leaf();
                    self.stack.push(Frame::new(child.clone(), 0));
                    if leaf {
                        break;
                    }
                    node = child;
                    i = 0;
                }
            }
        } else {
            // unwind to the nearest ancestor whose separator has not been
            // yielded yet
            while let Some(top) = self.stack.last() {
                if Self::can_move_right(top) {
                    break;
                }
                self.stack.pop();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::Natural;
    use crate::node::MemNode;
    use crate::tree::BTreeCore;

    fn tree_with(keys: &[i32]) -> BTreeCore<i32, i32, Natural, MemNode<i32, i32>> {
        let mut tree = BTreeCore::new(3, MemNode::empty(), Natural).unwrap();
        for &k in keys {
            tree.put(&mut (), k, k * 10).unwrap();
        }
        tree
    }

    #[test]
    fn test_empty_tree_cursor_is_out_of_tree() {
        let tree = tree_with(&[]);
        let cursor = tree.cursor(&mut ()).unwrap();
        assert!(!cursor.in_tree());
        assert_eq!(cursor.key(), None);
        assert_eq!(cursor.value(), None);
    }

    #[test]
    fn test_cursor_walks_in_order() {
        let tree = tree_with(&[4, 1, 3, 0, 2, 5]);
        let mut cursor = tree.cursor(&mut ()).unwrap();
        let mut seen = Vec::new();
        while cursor.in_tree() {
            seen.push((cursor.key().unwrap(), cursor.value().unwrap()));
            cursor.move_right(&mut ()).unwrap();
        }
        assert_eq!(
            seen,
            vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]
        );
    }

    #[test]
    fn test_cursor_matches_for_each() {
        let tree = tree_with(&[9, 7, 5, 3, 1, 8, 6, 4, 2, 0]);
        let mut via_for_each = Vec::new();
        tree.for_each(&mut (), &mut |k, v| via_for_each.push((*k, *v)))
            .unwrap();

        let mut via_cursor = Vec::new();
        let mut cursor = tree.cursor(&mut ()).unwrap();
        while cursor.in_tree() {
            via_cursor.push((cursor.key().unwrap(), cursor.value().unwrap()));
            cursor.move_right(&mut ()).unwrap();
        }
        assert_eq!(via_cursor, via_for_each);
    }

    #[test]
    fn test_cursor_from_positions_at_lub() {
        let tree = tree_with(&[0, 2, 4, 6, 8]);
        // exact hit
        let cursor = tree.cursor_from(&mut (), &4).unwrap();
        assert_eq!(cursor.key(), Some(4));
        // between keys: least key >= 3 is 4
        let cursor = tree.cursor_from(&mut (), &3).unwrap();
        assert_eq!(cursor.key(), Some(4));
        // below all keys
        let cursor = tree.cursor_from(&mut (), &-1).unwrap();
        assert_eq!(cursor.key(), Some(0));
        // above all keys
        let cursor = tree.cursor_from(&mut (), &9).unwrap();
        assert!(!cursor.in_tree());
    }

    #[test]
    fn test_cursor_from_walks_remaining_suffix() {
        let tree = tree_with(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut cursor = tree.cursor_from(&mut (), &5).unwrap();
        let mut seen = Vec::new();
        while cursor.in_tree() {
            seen.push(cursor.key().unwrap());
            cursor.move_right(&mut ()).unwrap();
        }
        assert_eq!(seen, vec![5, 6, 7]);
    }

    #[test]
    fn test_move_right_past_end_is_a_no_op() {
        let tree = tree_with(&[1]);
        let mut cursor = tree.cursor(&mut ()).unwrap();
        cursor.move_right(&mut ()).unwrap();
        assert!(!cursor.in_tree());
        cursor.move_right(&mut ()).unwrap();
        assert!(!cursor.in_tree());
    }

    #[test]
    fn test_frame_indexing_across_internal_nodes() {
        // enough keys to force a multi-level tree at order 3
        let keys: Vec<i32> = (0..50).collect();
        let tree = tree_with(&keys);
        let mut cursor = tree.cursor(&mut ()).unwrap();
        let mut seen = Vec::new();
        while cursor.in_tree() {
            seen.push(cursor.key().unwrap());
            cursor.move_right(&mut ()).unwrap();
        }
        assert_eq!(seen, keys);
    }
}
