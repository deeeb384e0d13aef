//! Persisted root state for the linear hash.
//!
//! The root object's payload is a MessagePack map of exactly six fields;
//! its reference list is the ordered top-level bucket handles. Chain
//! extension buckets are reachable only through bucket chain pointers,
//! never from the root.

use bytes::Bytes;
use strata_common::codec::{MsgPacker, MsgUnpacker};
use strata_common::{Result, StrataError};

/// Maximum number of key slots per bucket.
pub const BUCKET_CAPACITY: usize = 64;

/// Utilisation threshold above which a bucket is split.
pub const UTILIZATION_FACTOR: f64 = 0.75;

/// Length of the persisted hash key in bytes.
pub const HASH_KEY_LEN: usize = 16;

/// Decoded root state of a linear hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootState {
    /// Total number of entries.
    pub size: i64,
    /// Total number of buckets, including chain extensions.
    pub bucket_count: i64,
    /// Next top-level bucket slated for splitting.
    pub split_index: u64,
    /// Mask applied when the low-mask index points at an already-split
    /// bucket.
    pub mask_high: u64,
    /// Mask deciding whether a hash addresses an unsplit bucket.
    pub mask_low: u64,
    /// Key seeding the hash function; fixed for the map's lifetime.
    pub hash_key: [u8; HASH_KEY_LEN],
}

impl RootState {
    /// Initial state for a new map with the given hash key.
    pub fn new(hash_key: [u8; HASH_KEY_LEN]) -> Self {
        Self {
            size: 0,
            bucket_count: 2,
            split_index: 0,
            mask_high: 3,
            mask_low: 1,
            hash_key,
        }
    }

    /// Encodes the root payload.
    pub fn pack(&self) -> Bytes {
        let mut p = MsgPacker::new();
        p.map_header(6);
        p.str("Size");
        p.int(self.size);
        p.str("BucketCount");
        p.int(self.bucket_count);
        p.str("SplitIndex");
        p.uint(self.split_index);
        p.str("MaskHigh");
        p.uint(self.mask_high);
        p.str("MaskLow");
        p.uint(self.mask_low);
        p.str("HashKey");
        p.bin(&self.hash_key);
        p.into_bytes()
    }

    /// Decodes a root payload. Unknown fields, a wrong field count, or
    /// trailing bytes are decode errors.
    pub fn unpack(payload: &[u8]) -> Result<Self> {
        let mut u = MsgUnpacker::new(payload);
        let pairs = u.map_header()?;
        if pairs != 6 {
            return Err(StrataError::Decode(format!(
                "expected 6 fields in root map, found {pairs}"
            )));
        }
        let mut size = None;
        let mut bucket_count = None;
        let mut split_index = None;
        let mut mask_high = None;
        let mut mask_low = None;
        let mut hash_key = None;
        for _ in 0..pairs {
            match u.str()? {
                "Size" => size = Some(u.int()?),
                "BucketCount" => bucket_count = Some(u.int()?),
                "SplitIndex" => split_index = Some(u.uint()?),
                "MaskHigh" => mask_high = Some(u.uint()?),
                "MaskLow" => mask_low = Some(u.uint()?),
                "HashKey" => {
                    let raw = u.bin()?;
                    if raw.len() != HASH_KEY_LEN {
                        return Err(StrataError::Decode(format!(
                            "hash key must be {HASH_KEY_LEN} bytes, found {}",
                            raw.len()
                        )));
                    }
                    let mut key = [0u8; HASH_KEY_LEN];
                    key.copy_from_slice(raw);
                    hash_key = Some(key);
                }
                other => {
                    return Err(StrataError::Decode(format!(
                        "unexpected key in root map: {other}"
                    )))
                }
            }
        }
        u.expect_end()?;
        let missing = |field: &str| StrataError::Decode(format!("root map missing {field}"));
        Ok(Self {
            size: size.ok_or_else(|| missing("Size"))?,
            bucket_count: bucket_count.ok_or_else(|| missing("BucketCount"))?,
            split_index: split_index.ok_or_else(|| missing("SplitIndex"))?,
            mask_high: mask_high.ok_or_else(|| missing("MaskHigh"))?,
            mask_low: mask_low.ok_or_else(|| missing("MaskLow"))?,
            hash_key: hash_key.ok_or_else(|| missing("HashKey"))?,
        })
    }

    /// Maps a hash code to a top-level bucket index.
    pub fn bucket_index(&self, hash: u64) -> usize {
        let low = hash & self.mask_low;
        if low >= self.split_index {
            low as usize
        } else {
            (hash & self.mask_high) as usize
        }
    }

    /// True when the utilisation exceeds the split threshold.
    pub fn needs_split(&self) -> bool {
        (self.size as f64) / ((BUCKET_CAPACITY as i64 * self.bucket_count) as f64)
            > UTILIZATION_FACTOR
    }
}
