//! Bucket chains.
//!
//! A bucket is one store object holding up to [`BUCKET_CAPACITY`] key
//! slots. Its payload is a MessagePack array of binary entries, one per
//! slot, where an empty slot encodes as a zero-length binary. The
//! reference list carries the chain-next pointer at position 0 followed by
//! the value handles: `refs[i + 1]` belongs to `entries[i]`.
//!
//! The bucket's own handle doubles as a sentinel: `refs[0]` equal to the
//! bucket itself marks the end of the chain, and `refs[i + 1]` equal to
//! the bucket itself marks slot `i` as empty. Trailing self-references are
//! trimmed before writing to keep the persisted size tight.

use bytes::Bytes;
use strata_common::codec::{MsgPacker, MsgUnpacker};
use strata_common::{ObjId, Result, StrataError};
use strata_store::StoreTxn;

use crate::root::BUCKET_CAPACITY;

/// Outcome of a put on a bucket chain.
pub(crate) struct PutOutcome {
    /// True iff the chain gained an entry (as opposed to overwriting or
    /// relocating one).
    pub added: bool,
    /// Net change in the number of buckets in the chain.
    pub chain_delta: i64,
}

/// Outcome of a remove on a bucket chain.
pub(crate) struct RemoveOutcome {
    /// The chain's new head: the bucket itself when it survives, the next
    /// bucket's handle when the head emptied out and was detached, or None
    /// when the head emptied with no next bucket.
    pub head: Option<ObjId>,
    /// True iff an entry was removed.
    pub removed: bool,
    /// Net change in the number of buckets in the chain.
    pub chain_delta: i64,
}

/// One decoded bucket.
pub(crate) struct Bucket {
    pub obj: ObjId,
    pub entries: Vec<Option<Bytes>>,
    pub refs: Vec<ObjId>,
}

impl Bucket {
    /// A fresh empty bucket for the given handle. The chain pointer is the
    /// self-reference; nothing is written to the store.
    pub fn new_empty(obj: ObjId) -> Self {
        Self {
            obj,
            entries: vec![None; BUCKET_CAPACITY],
            refs: vec![obj],
        }
    }

    /// Reads and decodes a bucket.
    pub fn load<T: StoreTxn>(txn: &mut T, obj: ObjId) -> Result<Self> {
        let value = txn.read(obj)?;
        let mut u = MsgUnpacker::new(&value.payload);
        let n = u.array_header()?;
        if n > BUCKET_CAPACITY {
            return Err(StrataError::Decode(format!(
                "bucket {obj} declares {n} slots"
            )));
        }
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let raw = u.bin()?;
            entries.push(if raw.is_empty() {
                None
            } else {
                Some(Bytes::copy_from_slice(raw))
            });
        }
        u.expect_end()?;
        if value.refs.is_empty() || value.refs.len() > n + 1 {
            return Err(StrataError::Decode(format!(
                "bucket {obj} with {n} slots has {} refs",
                value.refs.len()
            )));
        }
        Ok(Self {
            obj,
            entries,
            refs: value.refs,
        })
    }

    /// Encodes and writes the bucket through its handle.
    pub fn write<T: StoreTxn>(&self, txn: &mut T) -> Result<()> {
        let mut p = MsgPacker::new();
        p.array_header(self.entries.len());
        for entry in &self.entries {
            match entry {
                Some(key) => p.bin(key),
                None => p.bin(&[]),
            }
        }
        txn.write(self.obj, p.into_bytes(), &self.refs)
    }

    /// True iff slot `idx` holds no entry.
    pub fn is_slot_empty(&self, idx: usize) -> bool {
        idx + 1 >= self.refs.len() || self.refs[idx + 1].same_referent(&self.obj)
    }

    /// Trims trailing self-references, shrinking the persisted size back
    /// to the last occupied slot.
    pub fn tidy_ref_tail(&mut self) {
        while self.refs.len() > 1 && self.refs[self.refs.len() - 1].same_referent(&self.obj) {
            self.refs.pop();
        }
    }

    /// The next bucket's handle, or None at the chain end.
    pub fn next_id(&self) -> Option<ObjId> {
        if self.refs[0].same_referent(&self.obj) {
            None
        } else {
            Some(self.refs[0])
        }
    }

    /// Loads the next bucket in the chain, if any.
    pub fn next<T: StoreTxn>(&self, txn: &mut T) -> Result<Option<Bucket>> {
        match self.next_id() {
            None => Ok(None),
            Some(id) => Bucket::load(txn, id).map(Some),
        }
    }

    /// Searches the chain for a key.
    pub fn find<T: StoreTxn>(&self, txn: &mut T, key: &[u8]) -> Result<Option<ObjId>> {
        for idx in 0..self.entries.len() {
            if self.is_slot_empty(idx) {
                continue;
            }
            if self.entries[idx].as_deref() == Some(key) {
                return Ok(Some(self.refs[idx + 1]));
            }
        }
        match self.next(txn)? {
            Some(next) => next.find(txn, key),
            None => Ok(None),
        }
    }

    /// Inserts or replaces `key` somewhere in this chain.
    pub fn put<T: StoreTxn>(&mut self, txn: &mut T, key: &Bytes, value: ObjId) -> Result<PutOutcome> {
        let mut slot = None;
        for idx in 0..self.entries.len() {
            if self.is_slot_empty(idx) {
                // a hole we could use, provided the key is not already in
                // this bucket
                if slot.is_none() {
                    slot = Some(idx);
                }
            } else if self.entries[idx].as_deref() == Some(key.as_ref()) {
                self.refs[idx + 1] = value;
                self.write(txn)?;
                return Ok(PutOutcome {
                    added: false,
                    chain_delta: 0,
                });
            }
        }
        match slot {
            None => self.put_in_next(txn, key, value),
            Some(slot) => self.put_in_slot(txn, key, value, slot),
        }
    }

    fn put_in_slot<T: StoreTxn>(
        &mut self,
        txn: &mut T,
        key: &Bytes,
        value: ObjId,
        slot: usize,
    ) -> Result<PutOutcome> {
        self.entries[slot] = Some(key.clone());
        let ref_slot = slot + 1;
        if ref_slot == self.refs.len() {
            self.refs.push(value);
        } else {
            self.refs[ref_slot] = value;
        }
        match self.next(txn)? {
            None => {
                self.write(txn)?;
                Ok(PutOutcome {
                    added: true,
                    chain_delta: 0,
                })
            }
            Some(mut next) => {
                // the key may exist further down the chain; this put must
                // not duplicate it
                let removed = next.remove(txn, key)?;
                self.refs[0] = removed.head.unwrap_or(self.obj);
                self.write(txn)?;
                Ok(PutOutcome {
                    added: !removed.removed,
                    chain_delta: removed.chain_delta,
                })
            }
        }
    }

    fn put_in_next<T: StoreTxn>(
        &mut self,
        txn: &mut T,
        key: &Bytes,
        value: ObjId,
    ) -> Result<PutOutcome> {
        match self.next(txn)? {
            Some(mut next) => {
                // the next bucket's handle cannot change on a put
                next.put(txn, key, value)
            }
            None => {
                let obj = txn.create(Bytes::new(), &[])?;
                let mut next = Bucket::new_empty(obj);
                let outcome = next.put(txn, key, value)?;
                self.refs[0] = next.obj;
                self.write(txn)?;
                Ok(PutOutcome {
                    added: outcome.added,
                    chain_delta: outcome.chain_delta + 1,
                })
            }
        }
    }

    /// Removes `key` from this chain if present.
    ///
    /// A bucket emptied by the removal is not written: it is detached by
    /// handing its successor back to the caller, which updates the link
    /// that reached it.
    pub fn remove<T: StoreTxn>(&mut self, txn: &mut T, key: &[u8]) -> Result<RemoveOutcome> {
        let mut slot = None;
        for idx in 0..self.entries.len() {
            if !self.is_slot_empty(idx) && self.entries[idx].as_deref() == Some(key) {
                slot = Some(idx);
                break;
            }
        }
        match slot {
            None => match self.next(txn)? {
                None => Ok(RemoveOutcome {
                    head: Some(self.obj),
                    removed: false,
                    chain_delta: 0,
                }),
                Some(mut next) => {
                    let outcome = next.remove(txn, key)?;
                    match outcome.head {
                        None => {
                            self.refs[0] = self.obj;
                            self.write(txn)?;
                        }
                        Some(head) if !self.refs[0].same_referent(&head) => {
                            self.refs[0] = head;
                            self.write(txn)?;
                        }
                        Some(_) => {}
                    }
                    Ok(RemoveOutcome {
                        head: Some(self.obj),
                        removed: outcome.removed,
                        chain_delta: outcome.chain_delta,
                    })
                }
            },
            Some(slot) => {
                self.entries[slot] = None;
                self.refs[slot + 1] = self.obj;
                self.tidy_ref_tail();
                if self.refs.len() == 1 {
                    // empty; no need to write, just disconnect
                    Ok(RemoveOutcome {
                        head: self.next_id(),
                        removed: true,
                        chain_delta: -1,
                    })
                } else {
                    self.write(txn)?;
                    Ok(RemoveOutcome {
                        head: Some(self.obj),
                        removed: true,
                        chain_delta: 0,
                    })
                }
            }
        }
    }

    /// Yields every occupied `(key, value)` in the chain, in slot order
    /// within each bucket.
    pub fn for_each<T: StoreTxn, F>(&self, txn: &mut T, f: &mut F) -> Result<()>
    where
        F: FnMut(&Bytes, ObjId),
    {
        for idx in 0..self.entries.len() {
            if self.is_slot_empty(idx) {
                continue;
            }
            if let Some(key) = &self.entries[idx] {
                f(key, self.refs[idx + 1]);
            }
        }
        match self.next(txn)? {
            Some(next) => next.for_each(txn, f),
            None => Ok(()),
        }
    }
}
