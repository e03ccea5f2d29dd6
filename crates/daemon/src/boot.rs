// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot-time configuration file.
//!
//! Two recognised keys, one `key = value` pair per line, `#` comments:
//!
//! ```text
//! log_level = info
//! metrics_port = 9901
//! ```

use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for the tracing `EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(BootError::BadValue { key: "log_level", value: other.to_string() }),
        }
    }
}

/// Parsed boot configuration. Missing file means all defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootConfig {
    pub log_level: LogLevel,
    /// Port for the metrics endpoint collaborator; the core serves nothing.
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootError {
    #[error("line {line}: expected `key = value`")]
    Malformed { line: usize },

    #[error("line {line}: unknown key: {key}")]
    UnknownKey { line: usize, key: String },

    #[error("bad value for {key}: {value}")]
    BadValue { key: &'static str, value: String },
}

impl BootConfig {
    pub fn parse(text: &str) -> Result<Self, BootError> {
        let mut config = BootConfig::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or(BootError::Malformed { line: index + 1 })?;
            match key {
                "log_level" => config.log_level = value.parse()?,
                "metrics_port" => {
                    let port: u16 = value.parse().map_err(|_| BootError::BadValue {
                        key: "metrics_port",
                        value: value.to_string(),
                    })?;
                    if port == 0 {
                        return Err(BootError::BadValue {
                            key: "metrics_port",
                            value: value.to_string(),
                        });
                    }
                    config.metrics_port = Some(port);
                }
                other => {
                    return Err(BootError::UnknownKey { line: index + 1, key: other.to_string() })
                }
            }
        }
        Ok(config)
    }

    /// Read from disk; an absent file yields defaults.
    pub fn load(path: &Path) -> Result<Self, BootError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
#[path = "boot_tests.rs"]
mod tests;
