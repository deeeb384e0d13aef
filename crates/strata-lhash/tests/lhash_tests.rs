//! Integration tests for the linear hash over the in-memory store.

use std::collections::HashMap;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_common::ObjId;
use strata_lhash::{LinearHash, BUCKET_CAPACITY, UTILIZATION_FACTOR};
use strata_store::{MemStore, StoreTxn, Transactor};

fn new_value(store: &MemStore, tag: &str) -> ObjId {
    store
        .transact(|txn| txn.create(Bytes::copy_from_slice(tag.as_bytes()), &[]))
        .unwrap()
}

#[test]
fn test_create_empty_initial_state() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();

    assert_eq!(map.size(&store).unwrap(), 0);
    let root = map.root_state(&store).unwrap();
    assert_eq!(root.size, 0);
    assert_eq!(root.bucket_count, 2);
    assert_eq!(root.split_index, 0);
    assert_eq!(root.mask_high, 3);
    assert_eq!(root.mask_low, 1);

    // reopening by handle sees the same state
    let map2 = LinearHash::from_root(map.root_handle());
    assert_eq!(map2.size(&store).unwrap(), 0);
}

#[test]
fn test_basic_put_find() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let h1 = new_value(&store, "h1");
    let h2 = new_value(&store, "h2");

    map.put(&store, b"a", h1).unwrap();
    map.put(&store, b"b", h2).unwrap();
    assert_eq!(map.find(&store, b"a").unwrap(), Some(h1));
    assert_eq!(map.find(&store, b"b").unwrap(), Some(h2));
    assert_eq!(map.find(&store, b"c").unwrap(), None);
    assert_eq!(map.size(&store).unwrap(), 2);
}

#[test]
fn test_put_is_idempotent() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let h1 = new_value(&store, "h1");
    let h2 = new_value(&store, "h2");

    map.put(&store, b"k", h1).unwrap();
    map.put(&store, b"k", h1).unwrap();
    assert_eq!(map.size(&store).unwrap(), 1);

    map.put(&store, b"k", h2).unwrap();
    assert_eq!(map.size(&store).unwrap(), 1);
    assert_eq!(map.find(&store, b"k").unwrap(), Some(h2));
}

#[test]
fn test_remove() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    map.put(&store, b"k", value).unwrap();
    map.remove(&store, b"k").unwrap();
    assert_eq!(map.size(&store).unwrap(), 0);
    assert_eq!(map.find(&store, b"k").unwrap(), None);

    // removing an absent key is a no-op
    map.remove(&store, b"never").unwrap();
    assert_eq!(map.size(&store).unwrap(), 0);

    // the map stays usable after emptying out
    map.put(&store, b"k", value).unwrap();
    assert_eq!(map.find(&store, b"k").unwrap(), Some(value));
}

#[test]
fn test_split_trigger_preserves_entries() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    // 97 entries push utilisation over 0.75 with two buckets
    let n = (BUCKET_CAPACITY as f64 * 2.0 * UTILIZATION_FACTOR) as i64 + 1;
    for i in 0..n {
        map.put(&store, format!("{i}").as_bytes(), value).unwrap();
    }

    let root = map.root_state(&store).unwrap();
    assert_eq!(root.size, n);
    assert!(root.bucket_count >= 3);
    assert!(root.split_index >= 1 || root.mask_low > 1);
    // after every public op the utilisation bound holds again
    assert!(
        root.size as f64 / (BUCKET_CAPACITY as f64 * root.bucket_count as f64)
            <= UTILIZATION_FACTOR
    );

    for i in 0..n {
        assert_eq!(
            map.find(&store, format!("{i}").as_bytes()).unwrap(),
            Some(value),
            "key {i} lost after split"
        );
    }
}

#[test]
fn test_mask_rollover_under_sustained_growth() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    for i in 0..1000u32 {
        map.put(&store, &i.to_be_bytes(), value).unwrap();
    }
    let root = map.root_state(&store).unwrap();
    assert_eq!(root.size, 1000);
    // several generations of splitting widen the masks
    assert!(root.mask_low >= 3);
    assert_eq!(root.mask_high, root.mask_low * 2 + 1);

    for i in 0..1000u32 {
        assert_eq!(map.find(&store, &i.to_be_bytes()).unwrap(), Some(value));
    }
}

#[test]
fn test_hash_key_never_changes() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    let initial = map.root_state(&store).unwrap().hash_key;
    assert_eq!(initial.len(), 16);
    for i in 0..200u32 {
        map.put(&store, &i.to_be_bytes(), value).unwrap();
    }
    for i in 0..100u32 {
        map.remove(&store, &i.to_be_bytes()).unwrap();
    }
    assert_eq!(map.root_state(&store).unwrap().hash_key, initial);
}

#[test]
fn test_for_each_visits_each_entry_exactly_once() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();

    let mut values = HashMap::new();
    for i in 0..300u32 {
        let value = new_value(&store, &format!("v{i}"));
        map.put(&store, format!("key-{i}").as_bytes(), value).unwrap();
        values.insert(format!("key-{i}").into_bytes(), value);
    }

    let mut seen: HashMap<Vec<u8>, ObjId> = HashMap::new();
    map.for_each(&store, |k, v| {
        let previous = seen.insert(k.to_vec(), v);
        assert!(previous.is_none(), "key yielded twice");
    })
    .unwrap();
    assert_eq!(seen, values);
}

#[test]
fn test_values_compare_by_referent_identity() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let v1 = new_value(&store, "same");
    let v2 = new_value(&store, "same");
    assert_ne!(v1, v2);

    map.put(&store, b"k", v1).unwrap();
    assert_eq!(map.find(&store, b"k").unwrap(), Some(v1));
    map.put(&store, b"k", v2).unwrap();
    assert_eq!(map.find(&store, b"k").unwrap(), Some(v2));
}

#[test]
fn test_restart_retries_transparently() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");
    map.put(&store, b"k", value).unwrap();

    store.fail_reads(2);
    assert_eq!(map.find(&store, b"k").unwrap(), Some(value));
}

#[test]
fn test_empty_then_refill_many_times() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    for round in 0..3 {
        for i in 0..150u32 {
            map.put(&store, &i.to_be_bytes(), value).unwrap();
        }
        assert_eq!(map.size(&store).unwrap(), 150, "round {round}");
        for i in 0..150u32 {
            map.remove(&store, &i.to_be_bytes()).unwrap();
        }
        assert_eq!(map.size(&store).unwrap(), 0, "round {round}");
        assert_eq!(map.find(&store, &0u32.to_be_bytes()).unwrap(), None);
    }
}

#[test]
fn test_soak_against_hashmap() {
    let store = MemStore::new();
    let mut map = LinearHash::create_empty(&store).unwrap();
    let mut rng = StdRng::seed_from_u64(20260802);
    let mut model: HashMap<String, ObjId> = HashMap::new();

    for step in 0..2048 {
        let model_size = model.len() as i64;
        // creation of new keys is biased by 1000, with one extra slot for
        // the occasional reset to a brand new map
        let op = rng.gen_range(0..3 * model_size + 1000) - 1000;

        if op == -1 {
            map = LinearHash::create_empty(&store).unwrap();
            model.clear();
        } else if op < -1 || model.is_empty() {
            let key = format!("{}", model.len());
            let value = new_value(&store, &format!("val-{step}"));
            map.put(&store, key.as_bytes(), value).unwrap();
            model.insert(key, value);
        } else {
            let idx = (op % model_size) as usize;
            let key = model.keys().nth(idx).cloned().unwrap_or_default();
            match op / model_size {
                0 => {
                    assert_eq!(
                        map.find(&store, key.as_bytes()).unwrap(),
                        model.get(&key).copied()
                    );
                }
                1 => {
                    let value = new_value(&store, &format!("val-{step}"));
                    map.put(&store, key.as_bytes(), value).unwrap();
                    model.insert(key, value);
                }
                _ => {
                    map.remove(&store, key.as_bytes()).unwrap();
                    model.remove(&key);
                }
            }
        }
        assert_eq!(map.size(&store).unwrap(), model.len() as i64);
    }

    // final full cross-check in both directions
    for (key, value) in &model {
        assert_eq!(map.find(&store, key.as_bytes()).unwrap(), Some(*value));
    }
    let mut seen = 0;
    map.for_each(&store, |k, v| {
        assert_eq!(model.get(&String::from_utf8_lossy(k).into_owned()), Some(&v));
        seen += 1;
    })
    .unwrap();
    assert_eq!(seen, model.len());
}

#[test]
fn test_chain_overflow_and_shrink() {
    // Force one bucket to chain by inserting keys that all land in it:
    // find such keys by probing the map's own addressing via removals.
    // Simpler: insert enough keys that some bucket must chain before the
    // utilisation threshold trips, then delete everything and check the
    // accounting still balances.
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");

    for i in 0..96u32 {
        map.put(&store, &i.to_be_bytes(), value).unwrap();
    }
    for i in 0..96u32 {
        map.remove(&store, &i.to_be_bytes()).unwrap();
    }
    assert_eq!(map.size(&store).unwrap(), 0);
    for i in 0..96u32 {
        assert_eq!(map.find(&store, &i.to_be_bytes()).unwrap(), None);
    }
}

#[test]
fn test_operations_compose_with_user_transactions() {
    let store = MemStore::new();
    let map = LinearHash::create_empty(&store).unwrap();
    let value = new_value(&store, "v");
    map.put(&store, b"k", value).unwrap();

    // collection state is readable alongside unrelated store work
    store
        .transact(|txn: &mut <MemStore as Transactor>::Txn| {
            let scratch = txn.create(Bytes::from_static(b"scratch"), &[])?;
            let _ = txn.read(scratch)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(map.find(&store, b"k").unwrap(), Some(value));
}
