//! Transactional object-store contract.
//!
//! The collections in this workspace are layered over an external store
//! whose objects carry an opaque byte payload plus an ordered list of
//! references to other objects. Every public collection operation runs as
//! a closure handed to a [`Transactor`]; when any store call signals that
//! a restart is needed, the closure bails out with
//! [`StrataError::RestartNeeded`] and the driver re-runs it from scratch
//! with fresh reads.

use bytes::Bytes;
use strata_common::{ObjId, Result};

/// Snapshot of one store object: an opaque payload plus an ordered list
/// of references to other store objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectValue {
    /// Opaque byte payload.
    pub payload: Bytes,
    /// Ordered references to other objects.
    pub refs: Vec<ObjId>,
}

/// One attempt of a store transaction.
///
/// Any call may fail with [`StrataError::RestartNeeded`]; the caller must
/// stop work and return the error so the driver can re-run the closure.
///
/// [`StrataError::RestartNeeded`]: strata_common::StrataError::RestartNeeded
pub trait StoreTxn {
    /// Allocates a new store object.
    fn create(&mut self, payload: Bytes, refs: &[ObjId]) -> Result<ObjId>;

    /// Reads an object's payload and references.
    fn read(&mut self, obj: ObjId) -> Result<ObjectValue>;

    /// Replaces an object's payload and references.
    fn write(&mut self, obj: ObjId, payload: Bytes, refs: &[ObjId]) -> Result<()>;
}

/// A store that can run transaction closures to completion.
pub trait Transactor {
    /// Transaction type handed to closures.
    type Txn: StoreTxn;

    /// Runs `f` inside a transaction, re-running it on restart signals and
    /// commit conflicts until it commits or the retry budget is exhausted.
    ///
    /// The closure must hold no state across invocations: a re-run starts
    /// from scratch with fresh reads.
    fn transact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnMut(&mut Self::Txn) -> Result<R>;
}
