// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_ids_carry_prefix_and_are_unique() {
    let a = RuntimeId::generate();
    let b = RuntimeId::generate();
    assert!(a.as_str().starts_with("rt-"));
    assert_eq!(a.as_str().len(), 3 + 19);
    assert_ne!(a, b);
}

#[test]
fn short_strips_prefix_and_truncates() {
    let id = RuntimeId::from_string("rt-abcdefghij");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefghij");
}

#[test]
fn serde_is_transparent() {
    let id = RuntimeId::from_string("rt-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"rt-xyz\"");
    let back: RuntimeId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
