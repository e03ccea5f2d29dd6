// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn glob_matching_covers_star_question_and_class() {
    assert!(matches("web-*", "web-1"));
    assert!(matches("web-?", "web-a"));
    assert!(!matches("web-?", "web-10"));
    assert!(matches("web-[12]", "web-2"));
    assert!(!matches("web-[12]", "web-3"));
    assert!(matches("exact", "exact"));
    assert!(!matches("exact", "exactly"));
}

#[test]
fn invalid_pattern_matches_nothing() {
    assert!(!matches("web-[", "web-["));
}

#[test]
fn name_validation() {
    assert!(valid_name("web-1"));
    assert!(valid_name("Cache_2"));
    assert!(!valid_name(""));
    assert!(!valid_name("has space"));
    assert!(!valid_name("star*"));
    assert!(!valid_name("a/b"));
    assert!(!valid_name(&"x".repeat(65)));
}

#[test]
fn pattern_detection() {
    assert!(is_pattern("web-*"));
    assert!(is_pattern("a?b"));
    assert!(!is_pattern("plain-name"));
}
