//! Handles naming objects in the transactional store.

use serde::{Deserialize, Serialize};

/// Opaque handle to an object in the transactional store.
///
/// Handles compare by referent identity: two handles are equal iff they
/// name the same store object, regardless of that object's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId(pub u64);

impl ObjId {
    /// Returns true if both handles name the same store object.
    pub fn same_referent(&self, other: &ObjId) -> bool {
        self == other
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}
