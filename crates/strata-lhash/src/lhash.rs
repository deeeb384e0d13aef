//! Linear hash map over the transactional object store.
//!
//! Keys are byte strings compared by byte equality; values are store
//! object handles. A keyed 64-bit hash (SipHash-2-4, seeded by the 16-byte
//! key persisted in the root) selects a top-level bucket; collisions chain
//! buckets through their first reference. When utilisation exceeds the
//! threshold, the bucket at the split index is split and its entries
//! rehashed through widened masks.

use std::hash::Hasher;

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use siphasher::sip::SipHasher24;
use strata_common::{ObjId, Result, StrataError};
use strata_store::{StoreTxn, Transactor};
use tracing::debug;

use crate::bucket::Bucket;
use crate::root::{RootState, HASH_KEY_LEN};

/// Per-transaction decoded state of the map.
struct Populated {
    root: RootState,
    refs: Vec<ObjId>,
    k0: u64,
    k1: u64,
}

impl Populated {
    fn hash(&self, key: &[u8]) -> u64 {
        let mut hasher = SipHasher24::new_with_keys(self.k0, self.k1);
        hasher.write(key);
        hasher.finish()
    }

    fn head_of(&self, idx: usize) -> Result<ObjId> {
        self.refs.get(idx).copied().ok_or_else(|| {
            StrataError::Decode(format!(
                "bucket index {idx} out of range for {} top-level buckets",
                self.refs.len()
            ))
        })
    }
}

/// Handle to a persistent linear hash map.
///
/// Every method runs its own transaction against the given store; on a
/// restart signal the whole operation re-runs from scratch, re-reading the
/// root and every bucket it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearHash {
    obj: ObjId,
}

impl LinearHash {
    /// Creates an empty map in the store.
    ///
    /// The hash key is drawn once from the operating system's entropy
    /// source and persists verbatim for the lifetime of the map.
    pub fn create_empty<S: Transactor>(store: &S) -> Result<Self> {
        let mut hash_key = [0u8; HASH_KEY_LEN];
        OsRng.fill_bytes(&mut hash_key);
        let obj = store.transact(|txn| {
            let obj = txn.create(Bytes::new(), &[])?;
            let root = RootState::new(hash_key);
            let mut refs = Vec::with_capacity(root.bucket_count as usize);
            for _ in 0..root.bucket_count {
                let bucket_obj = txn.create(Bytes::new(), &[])?;
                Bucket::new_empty(bucket_obj).write(txn)?;
                refs.push(bucket_obj);
            }
            txn.write(obj, root.pack(), &refs)?;
            Ok(obj)
        })?;
        Ok(Self { obj })
    }

    /// Opens an existing map by its root handle. No initialisation is
    /// performed; the object must already hold a map root.
    pub fn from_root(obj: ObjId) -> Self {
        Self { obj }
    }

    /// The root object handle.
    pub fn root_handle(&self) -> ObjId {
        self.obj
    }

    fn populate<T: StoreTxn>(&self, txn: &mut T) -> Result<Populated> {
        let value = txn.read(self.obj)?;
        let root = RootState::unpack(&value.payload)?;
        let mut half = [0u8; 8];
        half.copy_from_slice(&root.hash_key[..8]);
        let k0 = u64::from_le_bytes(half);
        half.copy_from_slice(&root.hash_key[8..]);
        let k1 = u64::from_le_bytes(half);
        Ok(Populated {
            root,
            refs: value.refs,
            k0,
            k1,
        })
    }

    /// Looks up a key, returning the value handle if present.
    pub fn find<S: Transactor>(&self, store: &S, key: &[u8]) -> Result<Option<ObjId>> {
        store.transact(|txn| {
            let populated = self.populate(txn)?;
            let idx = populated.root.bucket_index(populated.hash(key));
            let bucket = Bucket::load(txn, populated.head_of(idx)?)?;
            bucket.find(txn, key)
        })
    }

    /// Idempotently adds `key` with `value`; an existing entry's value is
    /// overwritten.
    pub fn put<S: Transactor>(&self, store: &S, key: &[u8], value: ObjId) -> Result<()> {
        let key = Bytes::copy_from_slice(key);
        store.transact(|txn| {
            let mut populated = self.populate(txn)?;
            let idx = populated.root.bucket_index(populated.hash(&key));
            let mut bucket = Bucket::load(txn, populated.head_of(idx)?)?;
            let outcome = bucket.put(txn, &key, value)?;
            if outcome.added || outcome.chain_delta != 0 {
                if outcome.added {
                    populated.root.size += 1;
                }
                populated.root.bucket_count += outcome.chain_delta;
                if populated.root.needs_split() {
                    self.split(txn, &mut populated)?;
                }
                txn.write(self.obj, populated.root.pack(), &populated.refs)?;
            }
            Ok(())
        })
    }

    /// Idempotently removes any entry matching `key`.
    pub fn remove<S: Transactor>(&self, store: &S, key: &[u8]) -> Result<()> {
        store.transact(|txn| {
            let mut populated = self.populate(txn)?;
            let idx = populated.root.bucket_index(populated.hash(key));
            let mut bucket = Bucket::load(txn, populated.head_of(idx)?)?;
            let outcome = bucket.remove(txn, key)?;
            if outcome.removed || outcome.chain_delta != 0 {
                match outcome.head {
                    // the slot must keep a bucket even though it emptied
                    None => bucket.write(txn)?,
                    Some(head) if !head.same_referent(&bucket.obj) => {
                        populated.refs[idx] = head;
                    }
                    Some(_) => {}
                }
                if outcome.removed {
                    populated.root.size -= 1;
                }
                populated.root.bucket_count += outcome.chain_delta;
                txn.write(self.obj, populated.root.pack(), &populated.refs)?;
            }
            Ok(())
        })
    }

    /// Returns the number of entries.
    pub fn size<S: Transactor>(&self, store: &S) -> Result<i64> {
        store.transact(|txn| Ok(self.populate(txn)?.root.size))
    }

    /// Iterates over every entry. Iteration order is undefined.
    ///
    /// Runs in one transaction; if the transaction restarts, the callback
    /// is invoked again from the beginning.
    pub fn for_each<S: Transactor, F>(&self, store: &S, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], ObjId),
    {
        store.transact(|txn| {
            let populated = self.populate(txn)?;
            for head in &populated.refs {
                let bucket = Bucket::load(txn, *head)?;
                bucket.for_each(txn, &mut |k: &Bytes, v| f(k, v))?;
            }
            Ok(())
        })
    }

    /// Snapshot of the decoded root state; for inspection and tests.
    pub fn root_state<S: Transactor>(&self, store: &S) -> Result<RootState> {
        store.transact(|txn| Ok(self.populate(txn)?.root))
    }

    // Split the bucket at the split index: append a brand new top-level
    // bucket, advance the split index (rolling the masks over when every
    // bucket of the current generation has been split), then walk the old
    // chain rehashing every entry through the new masks and moving the
    // ones that no longer belong. Emptied chain links are unlinked as the
    // walk goes.
    fn split<T: StoreTxn>(&self, txn: &mut T, populated: &mut Populated) -> Result<()> {
        let s_old = populated.root.split_index as usize;
        let mut bucket = Some(Bucket::load(txn, populated.head_of(s_old)?)?);
        let new_obj = txn.create(Bytes::new(), &[])?;
        let mut new_bucket = Bucket::new_empty(new_obj);
        populated.refs.push(new_obj);
        populated.root.bucket_count += 1;
        populated.root.split_index += 1;
        if 2 * populated.root.split_index == populated.refs.len() as u64 {
            // we've split everything in this generation
            populated.root.split_index = 0;
            populated.root.mask_low = populated.root.mask_high;
            populated.root.mask_high = populated.root.mask_high * 2 + 1;
        }
        debug!(
            split_index = populated.root.split_index,
            bucket_count = populated.root.bucket_count,
            "split bucket"
        );

        let mut prev: Option<Bucket> = None;
        while let Some(mut cur) = bucket {
            let next = cur.next(txn)?;
            let mut emptied = true;
            for idx in 0..cur.entries.len() {
                if cur.is_slot_empty(idx) {
                    continue;
                }
                let Some(key) = cur.entries[idx].clone() else {
                    continue;
                };
                if populated.root.bucket_index(populated.hash(&key)) == s_old {
                    emptied = false;
                } else {
                    let outcome = new_bucket.put(txn, &key, cur.refs[idx + 1])?;
                    populated.root.bucket_count += outcome.chain_delta;
                    cur.entries[idx] = None;
                    cur.refs[idx + 1] = cur.obj;
                }
            }

            if emptied {
                match (&mut prev, &next) {
                    (None, None) => {
                        // the slot must keep a bucket, and there is no
                        // next, so write this one out empty
                        cur.tidy_ref_tail();
                        cur.write(txn)?;
                    }
                    (Some(prev), None) => {
                        // detached from the tail; prev is written later
                        populated.root.bucket_count -= 1;
                        prev.refs[0] = prev.obj;
                    }
                    (None, Some(next)) => {
                        populated.root.bucket_count -= 1;
                        populated.refs[s_old] = next.obj;
                    }
                    (Some(prev), Some(next)) => {
                        populated.root.bucket_count -= 1;
                        prev.refs[0] = next.obj;
                    }
                }
            } else {
                cur.tidy_ref_tail();
                if let Some(prev) = prev.take() {
                    prev.write(txn)?;
                }
                prev = Some(cur);
            }
            bucket = next;
        }
        if let Some(prev) = prev {
            prev.write(txn)?;
        }
        new_bucket.write(txn)
    }
}
