//! In-memory transactional store with optimistic concurrency.
//!
//! Objects live in a shared map guarded by a single lock. A transaction
//! buffers its writes locally and records the version of every object it
//! reads; commit re-validates those versions under the write lock and
//! applies the buffered writes atomically. A failed validation surfaces as
//! a conflict, which the driver translates into a retry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use strata_common::{ObjId, Result, StoreConfig, StrataError};
use tracing::debug;

use crate::txn::{ObjectValue, StoreTxn, Transactor};

#[derive(Debug)]
struct StoredObject {
    payload: Bytes,
    refs: Vec<ObjId>,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    objects: HashMap<ObjId, StoredObject>,
}

/// Shared in-memory object store.
///
/// Cloning the store yields another handle to the same objects.
#[derive(Debug, Clone)]
pub struct MemStore {
    inner: Arc<RwLock<StoreInner>>,
    next_id: Arc<AtomicU64>,
    forced_restarts: Arc<AtomicU64>,
    config: StoreConfig,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Creates an empty store with the default driver configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store with the given driver configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            next_id: Arc::new(AtomicU64::new(0)),
            forced_restarts: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Forces the next `n` reads (across all transactions) to signal a
    /// restart. Test hook for exercising the retry protocol.
    pub fn fail_reads(&self, n: u64) {
        self.forced_restarts.store(n, Ordering::SeqCst);
    }

    /// Returns the number of committed objects.
    pub fn object_count(&self) -> usize {
        self.inner.read().objects.len()
    }

    fn begin(&self) -> MemTxn {
        MemTxn {
            inner: self.inner.clone(),
            next_id: self.next_id.clone(),
            forced_restarts: self.forced_restarts.clone(),
            reads: HashMap::new(),
            writes: HashMap::new(),
            created: Vec::new(),
        }
    }
}

/// One attempt of a transaction against a [`MemStore`].
#[derive(Debug)]
pub struct MemTxn {
    inner: Arc<RwLock<StoreInner>>,
    next_id: Arc<AtomicU64>,
    forced_restarts: Arc<AtomicU64>,
    /// Object versions observed by the first read of each object.
    reads: HashMap<ObjId, u64>,
    /// Writes buffered until commit, including created objects.
    writes: HashMap<ObjId, ObjectValue>,
    created: Vec<ObjId>,
}

impl MemTxn {
    fn maybe_forced_restart(&self) -> Result<()> {
        let remaining = self.forced_restarts.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .forced_restarts
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StrataError::RestartNeeded);
        }
        Ok(())
    }

    fn commit(self) -> Result<()> {
        let mut inner = self.inner.write();
        for (obj, version) in &self.reads {
            match inner.objects.get(obj) {
                Some(stored) if stored.version == *version => {}
                Some(_) => {
                    return Err(StrataError::Conflict(format!(
                        "{obj} changed underneath the transaction"
                    )))
                }
                None => {
                    return Err(StrataError::Conflict(format!(
                        "{obj} vanished underneath the transaction"
                    )))
                }
            }
        }
        for obj in self.writes.keys() {
            if !inner.objects.contains_key(obj) && !self.created.contains(obj) {
                return Err(StrataError::ObjectNotFound { obj: *obj });
            }
        }
        for (obj, value) in self.writes {
            let version = inner.objects.get(&obj).map_or(1, |s| s.version + 1);
            inner.objects.insert(
                obj,
                StoredObject {
                    payload: value.payload,
                    refs: value.refs,
                    version,
                },
            );
        }
        Ok(())
    }
}

impl StoreTxn for MemTxn {
    fn create(&mut self, payload: Bytes, refs: &[ObjId]) -> Result<ObjId> {
        let obj = ObjId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.push(obj);
        self.writes.insert(
            obj,
            ObjectValue {
                payload,
                refs: refs.to_vec(),
            },
        );
        Ok(obj)
    }

    fn read(&mut self, obj: ObjId) -> Result<ObjectValue> {
        self.maybe_forced_restart()?;
        if let Some(value) = self.writes.get(&obj) {
            return Ok(value.clone());
        }
        let inner = self.inner.read();
        let stored = inner
            .objects
            .get(&obj)
            .ok_or(StrataError::ObjectNotFound { obj })?;
        if let Entry::Vacant(e) = self.reads.entry(obj) {
            e.insert(stored.version);
        }
        Ok(ObjectValue {
            payload: stored.payload.clone(),
            refs: stored.refs.clone(),
        })
    }

    fn write(&mut self, obj: ObjId, payload: Bytes, refs: &[ObjId]) -> Result<()> {
        self.writes.insert(
            obj,
            ObjectValue {
                payload,
                refs: refs.to_vec(),
            },
        );
        Ok(())
    }
}

impl Transactor for MemStore {
    type Txn = MemTxn;

    fn transact<R, F>(&self, mut f: F) -> Result<R>
    where
        F: FnMut(&mut MemTxn) -> Result<R>,
    {
        for attempt in 0..self.config.max_attempts {
            let mut txn = self.begin();
            match f(&mut txn) {
                Ok(result) => match txn.commit() {
                    Ok(()) => return Ok(result),
                    Err(StrataError::Conflict(reason)) => {
                        debug!(attempt, %reason, "commit conflict, retrying transaction");
                    }
                    Err(e) => return Err(e),
                },
                Err(StrataError::RestartNeeded) => {
                    debug!(attempt, "restart requested, retrying transaction");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StrataError::Store(format!(
            "transaction gave up after {} attempts",
            self.config.max_attempts
        )))
    }
}
