//! Incrementally-splitting linear hash map over a transactional object
//! store.
//!
//! This crate provides:
//! - The persisted root state: entry count, bucket accounting, split
//!   index, addressing masks, and the hash key
//! - Bucket chains of fixed-capacity slot arrays, threaded through each
//!   bucket's first reference with self-reference sentinels
//! - The public map handle: create/open, find, put, remove, for-each,
//!   size

mod bucket;
mod lhash;
mod root;

pub use lhash::LinearHash;
pub use root::{RootState, BUCKET_CAPACITY, HASH_KEY_LEN, UTILIZATION_FACTOR};
