// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-name validation and glob matching for control commands.

/// True when `s` contains glob metacharacters (`*?[]`).
pub fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?', '[', ']'])
}

/// Match a runtime name against a `*?[]` glob pattern.
/// An invalid pattern matches nothing.
pub fn matches(pattern: &str, name: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(name),
        Err(_) => false,
    }
}

/// Names are bare identifiers: no whitespace, no glob metacharacters,
/// no path separators, at most 64 bytes.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && !is_pattern(name)
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_whitespace)
}

#[cfg(test)]
#[path = "pattern_tests.rs"]
mod tests;
