// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime id generation.

use serde::{Deserialize, Serialize};

/// Stable identifier for a runtime. Generated once at `create` and carried
/// across daemon restarts through the persistence sidecar.
///
/// Format: `rt-` followed by a 19-character nanoid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(String);

impl RuntimeId {
    pub const PREFIX: &'static str = "rt-";

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19)))
    }

    /// Wrap an existing id string (deserialization, tests).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id without its type prefix, truncated to `n` characters.
    pub fn short(&self, n: usize) -> &str {
        let suffix = self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0);
        let end = n.min(suffix.len());
        &suffix[..end]
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RuntimeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
