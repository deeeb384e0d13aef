//! Transactional object store for strata.
//!
//! This crate provides:
//! - The store contract consumed by the collections: objects holding an
//!   opaque payload plus ordered references, read and written inside
//!   restartable transactions
//! - An in-memory store with optimistic concurrency, used by tests and as
//!   a reference implementation of the contract

mod mem;
mod txn;

pub use mem::{MemStore, MemTxn};
pub use txn::{ObjectValue, StoreTxn, Transactor};
