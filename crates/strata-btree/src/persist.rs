//! Persistent B-tree over the transactional object store.
//!
//! A node is one store object. Its payload is a MessagePack array of the
//! node's keys; its reference list is the node's values followed by its
//! child handles (absent for a leaf). Nodes are re-read and re-decoded on
//! every descent — nothing decoded survives a transaction restart.
//!
//! Node payload layout:
//! - array header (count = number of keys)
//! - that many binary entries, the keys in order
//!
//! Reference list layout:
//! - values: one handle per key
//! - child handles: none for a leaf, otherwise key count + 1

use std::marker::PhantomData;

use bytes::Bytes;
use strata_common::{
    codec::{MsgPacker, MsgUnpacker},
    ObjId, Result, StrataError, TreeConfig,
};
use strata_store::{ObjectValue, StoreTxn, Transactor};

use crate::cmp::Lexicographic;
use crate::cursor::Cursor;
use crate::node::Node;
use crate::seq::Seq;
use crate::tree::BTreeCore;

/// The order used by the persistent tree unless overridden.
pub const DEFAULT_ORDER: usize = 128;

fn pack_keys(keys: &Seq<Bytes>) -> Bytes {
    let mut p = MsgPacker::new();
    p.array_header(keys.len());
    for i in 0..keys.len() {
        p.bin(&keys.get(i));
    }
    p.into_bytes()
}

fn unpack_node(obj: ObjId, value: &ObjectValue) -> Result<(Seq<Bytes>, Seq<ObjId>, Seq<ObjId>)> {
    let mut u = MsgUnpacker::new(&value.payload);
    let n = u.array_header()?;
    let mut keys = Vec::with_capacity(n);
    for _ in 0..n {
        keys.push(Bytes::copy_from_slice(u.bin()?));
    }
    u.expect_end()?;
    let refs = &value.refs;
    if refs.len() == n {
        // leaf: every ref is a value
        Ok((Seq::from_vec(keys), Seq::from_vec(refs.clone()), Seq::empty()))
    } else if refs.len() == 2 * n + 1 {
        Ok((
            Seq::from_vec(keys),
            Seq::from_vec(refs[..n].to_vec()),
            Seq::from_vec(refs[n..].to_vec()),
        ))
    } else {
        Err(StrataError::Decode(format!(
            "node {obj} with {n} keys has {} refs",
            refs.len()
        )))
    }
}

/// One decoded node of the persistent tree.
///
/// Holds the node's handle plus its decoded content; mutation re-encodes
/// and writes through the handle.
pub struct PersistNode<T> {
    obj: ObjId,
    keys: Seq<Bytes>,
    values: Seq<ObjId>,
    child_ids: Seq<ObjId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PersistNode<T> {
    fn clone(&self) -> Self {
        Self {
            obj: self.obj,
            keys: self.keys.clone(),
            values: self.values.clone(),
            child_ids: self.child_ids.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: StoreTxn + 'static> Node<Bytes, ObjId> for PersistNode<T> {
    type Cx = T;
    type ChildRef = ObjId;

    fn keys(&self) -> Seq<Bytes> {
        self.keys.clone()
    }

    fn values(&self) -> Seq<ObjId> {
        self.values.clone()
    }

    fn children(&self) -> Seq<ObjId> {
        self.child_ids.clone()
    }

    fn child_count(&self) -> usize {
        self.child_ids.len()
    }

    fn load(cx: &mut T, child: &ObjId) -> Result<Self> {
        let value = cx.read(*child)?;
        let (keys, values, child_ids) = unpack_node(*child, &value)?;
        Ok(Self {
            obj: *child,
            keys,
            values,
            child_ids,
            _marker: PhantomData,
        })
    }

    fn child_ref(&self) -> ObjId {
        self.obj
    }

    fn update(
        &mut self,
        cx: &mut T,
        keys: Seq<Bytes>,
        values: Seq<ObjId>,
        children: Seq<ObjId>,
    ) -> Result<()> {
        let keys = Seq::from_vec(keys.to_vec());
        let values_v = values.to_vec();
        let children_v = children.to_vec();
        let payload = pack_keys(&keys);
        let mut refs = values_v.clone();
        refs.extend_from_slice(&children_v);
        cx.write(self.obj, payload, &refs)?;
        self.keys = keys;
        self.values = Seq::from_vec(values_v);
        self.child_ids = Seq::from_vec(children_v);
        Ok(())
    }

    fn create_sibling(
        &self,
        cx: &mut T,
        keys: Seq<Bytes>,
        values: Seq<ObjId>,
        children: Seq<ObjId>,
    ) -> Result<Self> {
        let keys = Seq::from_vec(keys.to_vec());
        let values_v = values.to_vec();
        let children_v = children.to_vec();
        let payload = pack_keys(&keys);
        let mut refs = values_v.clone();
        refs.extend_from_slice(&children_v);
        let obj = cx.create(payload, &refs)?;
        Ok(Self {
            obj,
            keys,
            values: Seq::from_vec(values_v),
            child_ids: Seq::from_vec(children_v),
            _marker: PhantomData,
        })
    }
}

/// Handle to a persistent B-tree.
///
/// The handle names the tree's root object, whose external identity is
/// stable across growth: a root split clones the old content into a new
/// sibling and rewrites the root in place.
///
/// Every method runs its own transaction against the given store; on a
/// restart signal the whole operation re-runs from scratch. The order is a
/// runtime parameter and is not persisted — every handle opened on the
/// same root must use the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    root: ObjId,
    order: usize,
}

impl BTree {
    /// Creates an empty tree in the store.
    pub fn create_empty<S: Transactor>(store: &S) -> Result<Self>
    where
        S::Txn: 'static,
    {
        let root = store.transact(|txn| txn.create(pack_keys(&Seq::empty()), &[]))?;
        Ok(Self {
            root,
            order: DEFAULT_ORDER,
        })
    }

    /// Opens an existing tree by its root handle, with the default order.
    pub fn from_root(root: ObjId) -> Self {
        Self {
            root,
            order: DEFAULT_ORDER,
        }
    }

    /// Opens an existing tree with an explicit configuration.
    pub fn with_config(root: ObjId, config: &TreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root,
            order: config.order,
        })
    }

    /// The root object handle.
    pub fn root_handle(&self) -> ObjId {
        self.root
    }

    fn core<T: StoreTxn + 'static>(
        &self,
        txn: &mut T,
    ) -> Result<BTreeCore<Bytes, ObjId, Lexicographic, PersistNode<T>>> {
        let root = PersistNode::load(txn, &self.root)?;
        BTreeCore::new(self.order, root, Lexicographic)
    }

    /// Total number of keys.
    pub fn size<S: Transactor>(&self, store: &S) -> Result<usize>
    where
        S::Txn: 'static,
    {
        store.transact(|txn| {
            let core = self.core(txn)?;
            core.len(txn)
        })
    }

    /// Looks up a key, returning the value handle if present.
    pub fn find<S: Transactor>(&self, store: &S, key: &[u8]) -> Result<Option<ObjId>>
    where
        S::Txn: 'static,
    {
        let key = Bytes::copy_from_slice(key);
        store.transact(|txn| {
            let core = self.core(txn)?;
            core.find(txn, &key)
        })
    }

    /// Inserts or replaces a key.
    pub fn put<S: Transactor>(&self, store: &S, key: &[u8], value: ObjId) -> Result<()>
    where
        S::Txn: 'static,
    {
        let key = Bytes::copy_from_slice(key);
        store.transact(|txn| {
            let mut core = self.core(txn)?;
            core.put(txn, key.clone(), value)
        })
    }

    /// Removes a key; a no-op if absent.
    pub fn remove<S: Transactor>(&self, store: &S, key: &[u8]) -> Result<()>
    where
        S::Txn: 'static,
    {
        let key = Bytes::copy_from_slice(key);
        store.transact(|txn| {
            let mut core = self.core(txn)?;
            core.remove(txn, &key)
        })
    }

    /// In-order traversal over `(key, value)` pairs.
    ///
    /// Runs in one transaction; if the transaction restarts, the callback
    /// is invoked again from the beginning.
    pub fn for_each<S: Transactor, F>(&self, store: &S, mut f: F) -> Result<()>
    where
        S::Txn: 'static,
        F: FnMut(&[u8], ObjId),
    {
        store.transact(|txn| {
            let core = self.core(txn)?;
            core.for_each(txn, &mut |k: &Bytes, v: &ObjId| f(k, *v))
        })
    }

    /// Verifies the structural invariants inside one transaction; for
    /// tests.
    pub fn check_invariants<S: Transactor>(&self, store: &S) -> Result<()>
    where
        S::Txn: 'static,
    {
        store.transact(|txn| {
            let core = self.core(txn)?;
            core.check_invariants(txn)
        })
    }

    /// Cursor at the smallest key, scoped to the given transaction.
    pub fn cursor_within<T: StoreTxn + 'static>(
        &self,
        txn: &mut T,
    ) -> Result<Cursor<Bytes, ObjId, PersistNode<T>>> {
        let core = self.core(txn)?;
        core.cursor(txn)
    }

    /// Cursor at the least key >= `key`, scoped to the given transaction.
    pub fn cursor_from_within<T: StoreTxn + 'static>(
        &self,
        txn: &mut T,
        key: &[u8],
    ) -> Result<Cursor<Bytes, ObjId, PersistNode<T>>> {
        let core = self.core(txn)?;
        core.cursor_from(txn, &Bytes::copy_from_slice(key))
    }
}
