// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn store() -> Store {
    Store::new(0, EvictionPolicy::None)
}

fn set(store: &mut Store, key: &str, value: &str) {
    store.put(key, Value::Str(value.to_string()), None).unwrap();
}

#[test]
fn put_get_roundtrip() {
    let mut s = store();
    set(&mut s, "k", "v");
    assert_eq!(s.get_value("k", 0), Some(&Value::Str("v".into())));
    assert_eq!(s.get_value("missing", 0), None);
}

#[test]
fn type_is_sticky_and_conflicts_leave_value_unchanged() {
    let mut s = store();
    set(&mut s, "k", "1");
    let err = s
        .update("k", 0, || Value::List(VecDeque::new()), |value| match value {
            Value::List(items) => {
                items.push_front("a".into());
                Ok(())
            }
            _ => Err(StoreError::TypeConflict),
        })
        .unwrap_err();
    assert_eq!(err, StoreError::TypeConflict);
    // GET still returns the original string.
    assert_eq!(s.get_value("k", 0), Some(&Value::Str("1".into())));
}

#[test]
fn set_overwrites_any_type() {
    let mut s = store();
    s.update("k", 0, || Value::List(VecDeque::new()), |value| match value {
        Value::List(items) => {
            items.push_back("a".into());
            Ok(())
        }
        _ => Err(StoreError::TypeConflict),
    })
    .unwrap();
    set(&mut s, "k", "now a string");
    assert_eq!(s.type_of("k", 0), Some("string"));
}

#[test]
fn lazy_expiry_on_read() {
    let mut s = store();
    set(&mut s, "k", "v");
    assert!(s.expire_at("k", 1_000, 0));
    assert!(s.get_value("k", 999).is_some());
    // At and past the deadline the key is gone; no stale value observed.
    assert_eq!(s.get_value("k", 1_000), None);
    assert!(!s.contains("k", 1_001));
}

#[test]
fn ttl_reports_all_three_shapes() {
    let mut s = store();
    assert_eq!(s.ttl_ms("missing", 0), None);
    set(&mut s, "k", "v");
    assert_eq!(s.ttl_ms("k", 0), Some(None));
    s.expire_at("k", 5_000, 0);
    assert_eq!(s.ttl_ms("k", 2_000), Some(Some(3_000)));
}

#[test]
fn persist_clears_expiry() {
    let mut s = store();
    set(&mut s, "k", "v");
    assert!(!s.persist("k", 0));
    s.expire_at("k", 1_000, 0);
    assert!(s.persist("k", 0));
    assert!(s.get_value("k", 2_000).is_some());
}

#[test]
fn size_purges_expired_entries() {
    let mut s = store();
    set(&mut s, "a", "1");
    set(&mut s, "b", "2");
    s.expire_at("a", 100, 0);
    assert_eq!(s.size(50), 2);
    assert_eq!(s.size(200), 1);
}

#[test]
fn keys_filters_by_glob() {
    let mut s = store();
    set(&mut s, "user:1", "a");
    set(&mut s, "user:2", "b");
    set(&mut s, "other", "c");
    assert_eq!(s.keys("user:*", 0), vec!["user:1".to_string(), "user:2".to_string()]);
    assert_eq!(s.keys("*", 0).len(), 3);
}

#[test]
fn scan_pages_through_and_terminates() {
    let mut s = store();
    for i in 0..5 {
        set(&mut s, &format!("k{}", i), "v");
    }
    let (cursor, page) = s.scan(0, 2, 0);
    assert_eq!(page.len(), 2);
    assert_eq!(cursor, 2);
    let (cursor, page) = s.scan(cursor, 2, 0);
    assert_eq!(page.len(), 2);
    assert_eq!(cursor, 4);
    let (cursor, page) = s.scan(cursor, 2, 0);
    assert_eq!(page.len(), 1);
    assert_eq!(cursor, 0);
}

#[test]
fn sweep_drops_expired_samples() {
    let mut s = store();
    for i in 0..10 {
        set(&mut s, &format!("k{}", i), "v");
        s.expire_at(&format!("k{}", i), 100, 0);
    }
    set(&mut s, "keeper", "v");
    let dropped = s.sweep_expired(100, 200);
    assert!(!dropped.is_empty());
    assert!(s.contains("keeper", 200));
    for key in dropped {
        assert!(!s.contains(&key, 200));
    }
}

#[test]
fn none_policy_rejects_writes_over_budget() {
    let mut s = Store::new(256, EvictionPolicy::None);
    set(&mut s, "a", &"x".repeat(100));
    let err = s.put("b", Value::Str("y".repeat(200)), None).unwrap_err();
    assert_eq!(err, StoreError::OutOfMemory);
    // Existing data intact.
    assert!(s.contains("a", 0));
    assert!(!s.contains("b", 0));
}

#[test]
fn lru_eviction_keeps_recently_touched_keys() {
    let mut s = Store::new(1024, EvictionPolicy::AllkeysLru);
    for i in 0..100 {
        s.put(&format!("key{:03}", i), Value::Str("x".repeat(100)), None).unwrap();
    }
    let size = s.size(0);
    assert!(size < 100, "eviction must have run, got {}", size);
    assert!(size > 0);
    // The most recently written key survives.
    assert!(s.contains("key099", 0));
}

#[test]
fn lru_touch_protects_read_keys() {
    let mut s = Store::new(700, EvictionPolicy::AllkeysLru);
    for i in 0..4 {
        s.put(&format!("k{}", i), Value::Str("x".repeat(80)), None).unwrap();
    }
    // Touch k0 so k1 becomes the coldest.
    assert!(s.get_value("k0", 0).is_some());
    s.put("overflow", Value::Str("x".repeat(80)), None).unwrap();
    assert!(s.contains("k0", 0));
    assert!(!s.contains("k1", 0));
}

#[test]
fn random_eviction_stays_under_budget() {
    let mut s = Store::new(1024, EvictionPolicy::AllkeysRandom);
    for i in 0..50 {
        s.put(&format!("key{}", i), Value::Str("x".repeat(100)), None).unwrap();
    }
    assert!(s.memory_used() <= 1024);
    assert!(s.size(0) < 50);
}

#[test]
fn memory_accounting_tracks_deletes() {
    let mut s = store();
    set(&mut s, "k", &"v".repeat(100));
    let used = s.memory_used();
    assert!(used > 100);
    s.delete("k", 0);
    assert_eq!(s.memory_used(), 0);
}

#[test]
fn clear_resets_everything() {
    let mut s = store();
    set(&mut s, "a", "1");
    set(&mut s, "b", "2");
    s.clear();
    assert_eq!(s.size(0), 0);
    assert_eq!(s.memory_used(), 0);
    // Reusable after clear.
    set(&mut s, "c", "3");
    assert!(s.contains("c", 0));
}
