// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary keyspace snapshots.
//!
//! Layout: `SLYC` magic, u16 version, u32 entry count, then per entry a
//! TLV record: key (u32 length + bytes), type tag (u8), type-specific
//! payload, expiry flag (u8) + absolute epoch-ms (u64). All integers
//! big-endian. Unknown magic or version is rejected.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write as _;
use std::path::Path;

use thiserror::Error;

use super::store::{Store, Value};

const MAGIC: &[u8; 4] = b"SLYC";
const VERSION: u16 = 1;

const TAG_STR: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_SET: u8 = 2;
const TAG_HASH: u8 = 3;

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a snapshot (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    BadVersion(u16),

    #[error("truncated or corrupt snapshot")]
    Corrupt,
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Serialize the entire keyspace with TTLs.
pub fn encode(store: &Store) -> Vec<u8> {
    let entries: Vec<_> = store.entries().collect();
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (key, entry) in entries {
        put_str(&mut out, key);
        match &entry.value {
            Value::Str(s) => {
                out.push(TAG_STR);
                put_str(&mut out, s);
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    put_str(&mut out, item);
                }
            }
            Value::Set(items) => {
                out.push(TAG_SET);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                let mut sorted: Vec<&String> = items.iter().collect();
                sorted.sort();
                for item in sorted {
                    put_str(&mut out, item);
                }
            }
            Value::Hash(map) => {
                out.push(TAG_HASH);
                out.extend_from_slice(&(map.len() as u32).to_be_bytes());
                let mut sorted: Vec<(&String, &String)> = map.iter().collect();
                sorted.sort();
                for (field, value) in sorted {
                    put_str(&mut out, field);
                    put_str(&mut out, value);
                }
            }
        }
        match entry.expires_at_ms {
            Some(at) => {
                out.push(1);
                out.extend_from_slice(&at.to_be_bytes());
            }
            None => {
                out.push(0);
                out.extend_from_slice(&0u64.to_be_bytes());
            }
        }
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapError> {
        let slice = self.buf.get(self.pos..self.pos + n).ok_or(SnapError::Corrupt)?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, SnapError> {
        let bytes = self.take(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(array))
    }

    fn string(&mut self) -> Result<String, SnapError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Decode a snapshot into `(key, value, expires_at_ms)` triples.
#[allow(clippy::type_complexity)]
pub fn decode(buf: &[u8]) -> Result<Vec<(String, Value, Option<u64>)>, SnapError> {
    let mut reader = Reader { buf, pos: 0 };
    if reader.take(4)? != MAGIC {
        return Err(SnapError::BadMagic);
    }
    let version = reader.u16()?;
    if version != VERSION {
        return Err(SnapError::BadVersion(version));
    }
    let count = reader.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let key = reader.string()?;
        let value = match reader.u8()? {
            TAG_STR => Value::Str(reader.string()?),
            TAG_LIST => {
                let n = reader.u32()? as usize;
                let mut items = VecDeque::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    items.push_back(reader.string()?);
                }
                Value::List(items)
            }
            TAG_SET => {
                let n = reader.u32()? as usize;
                let mut items = HashSet::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    items.insert(reader.string()?);
                }
                Value::Set(items)
            }
            TAG_HASH => {
                let n = reader.u32()? as usize;
                let mut map = HashMap::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    let field = reader.string()?;
                    let value = reader.string()?;
                    map.insert(field, value);
                }
                Value::Hash(map)
            }
            _ => return Err(SnapError::Corrupt),
        };
        let has_expiry = reader.u8()? == 1;
        let at = reader.u64()?;
        entries.push((key, value, has_expiry.then_some(at)));
    }
    Ok(entries)
}

/// Write the keyspace to `path` (temp file + rename).
pub fn save(store: &Store, path: &Path) -> Result<(), SnapError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("snap.tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(&encode(store))?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot back. Entries already expired at `now_ms` are skipped.
#[allow(clippy::type_complexity)]
pub fn load(path: &Path, now_ms: u64) -> Result<Vec<(String, Value, Option<u64>)>, SnapError> {
    let buf = std::fs::read(path)?;
    let entries = decode(&buf)?;
    Ok(entries
        .into_iter()
        .filter(|(_, _, expiry)| expiry.map(|at| at > now_ms).unwrap_or(true))
        .collect())
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
