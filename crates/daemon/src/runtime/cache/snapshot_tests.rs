// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use socketley_core::EvictionPolicy;
use std::collections::VecDeque;

fn sample_store() -> Store {
    let mut s = Store::new(0, EvictionPolicy::None);
    s.put("greeting", Value::Str("hello".into()), None).unwrap();
    s.put("queue", Value::List(VecDeque::from(["a".to_string(), "b".to_string()])), None)
        .unwrap();
    s.put(
        "tags",
        Value::Set(["x".to_string(), "y".to_string()].into_iter().collect()),
        None,
    )
    .unwrap();
    s.put(
        "profile",
        Value::Hash([("name".to_string(), "ada".to_string())].into_iter().collect()),
        None,
    )
    .unwrap();
    s.put("ephemeral", Value::Str("soon gone".into()), Some(10_000)).unwrap();
    s
}

#[test]
fn roundtrip_preserves_all_types_and_ttls() {
    let store = sample_store();
    let entries = decode(&encode(&store)).unwrap();
    assert_eq!(entries.len(), 5);

    let find = |key: &str| entries.iter().find(|(k, _, _)| k == key).unwrap();
    assert_eq!(find("greeting").1, Value::Str("hello".into()));
    assert_eq!(
        find("queue").1,
        Value::List(VecDeque::from(["a".to_string(), "b".to_string()]))
    );
    match &find("tags").1 {
        Value::Set(items) => assert_eq!(items.len(), 2),
        other => panic!("unexpected: {:?}", other),
    }
    match &find("profile").1 {
        Value::Hash(map) => assert_eq!(map.get("name").map(String::as_str), Some("ada")),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(find("ephemeral").2, Some(10_000));
    assert_eq!(find("greeting").2, None);
}

#[test]
fn header_carries_magic_and_version() {
    let bytes = encode(&sample_store());
    assert_eq!(&bytes[..4], b"SLYC");
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 1);
}

#[test]
fn bad_magic_and_version_are_rejected() {
    let mut bytes = encode(&sample_store());
    bytes[0] = b'X';
    assert!(matches!(decode(&bytes), Err(SnapError::BadMagic)));

    let mut bytes = encode(&sample_store());
    bytes[5] = 9;
    assert!(matches!(decode(&bytes), Err(SnapError::BadVersion(9))));
}

#[test]
fn truncated_snapshot_is_corrupt() {
    let bytes = encode(&sample_store());
    assert!(matches!(decode(&bytes[..bytes.len() - 3]), Err(SnapError::Corrupt)));
}

#[test]
fn save_load_skips_entries_expired_at_load_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.snap");
    save(&sample_store(), &path).unwrap();

    let fresh = load(&path, 0).unwrap();
    assert_eq!(fresh.len(), 5);

    // Past the ephemeral entry's deadline it is filtered out.
    let later = load(&path, 20_000).unwrap();
    assert_eq!(later.len(), 4);
    assert!(!later.iter().any(|(k, _, _)| k == "ephemeral"));
}
