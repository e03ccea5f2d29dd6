// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The keyspace: tagged values, sticky per-key types, TTL, LRU linkage,
//! memory accounting and eviction.
//!
//! Time is always passed in as epoch milliseconds so every path is
//! testable with a fake clock.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::Rng as _;
use socketley_core::EvictionPolicy;
use thiserror::Error;

/// Tagged value variants. A key holds exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }

    /// Approximate heap footprint, for the memory budget.
    fn size(&self) -> u64 {
        match self {
            Value::Str(s) => s.len() as u64,
            Value::List(items) => items.iter().map(|i| i.len() as u64 + 16).sum(),
            Value::Set(items) => items.iter().map(|i| i.len() as u64 + 16).sum(),
            Value::Hash(map) => {
                map.iter().map(|(k, v)| k.len() as u64 + v.len() as u64 + 32).sum()
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The stored value's type does not match the operation. The stored
    /// value is unchanged.
    #[error("type conflict")]
    TypeConflict,

    #[error("out of memory")]
    OutOfMemory,

    #[error("value is not an integer")]
    NotInteger,
}

/// Per-entry bookkeeping. LRU linkage lives in the slot list.
#[derive(Debug)]
pub struct Entry {
    pub value: Value,
    pub expires_at_ms: Option<u64>,
    slot: usize,
}

const NIL: usize = usize::MAX;

/// Intrusive doubly-linked LRU list over slab slots: O(1) touch, O(1)
/// evict from the tail.
#[derive(Debug, Default)]
struct LruList {
    slots: Vec<LruSlot>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

#[derive(Debug)]
struct LruSlot {
    prev: usize,
    next: usize,
    key: String,
}

impl LruList {
    fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), head: NIL, tail: NIL }
    }

    fn insert_front(&mut self, key: String) -> usize {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = LruSlot { prev: NIL, next: self.head, key };
                slot
            }
            None => {
                self.slots.push(LruSlot { prev: NIL, next: self.head, key });
                self.slots.len() - 1
            }
        };
        if self.head != NIL {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
        slot
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn remove(&mut self, slot: usize) {
        self.unlink(slot);
        self.slots[slot].key = String::new();
        self.free.push(slot);
    }

    fn touch(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn tail_key(&self) -> Option<&str> {
        if self.tail == NIL {
            None
        } else {
            Some(&self.slots[self.tail].key)
        }
    }
}

/// The cache keyspace.
pub struct Store {
    map: HashMap<String, Entry>,
    lru: LruList,
    used: u64,
    max_memory: u64,
    eviction: EvictionPolicy,
}

impl Store {
    pub fn new(max_memory: u64, eviction: EvictionPolicy) -> Self {
        Self { map: HashMap::new(), lru: LruList::new(), used: 0, max_memory, eviction }
    }

    pub fn memory_used(&self) -> u64 {
        self.used
    }

    fn entry_size(key: &str, value: &Value) -> u64 {
        64 + key.len() as u64 + value.size()
    }

    fn is_expired(entry: &Entry, now_ms: u64) -> bool {
        entry.expires_at_ms.map(|at| at <= now_ms).unwrap_or(false)
    }

    fn drop_key(&mut self, key: &str) {
        if let Some(entry) = self.map.remove(key) {
            self.used = self.used.saturating_sub(Self::entry_size(key, &entry.value));
            self.lru.remove(entry.slot);
        }
    }

    /// Lazy expiry check on every access path.
    fn expire_if_due(&mut self, key: &str, now_ms: u64) -> bool {
        let due = self.map.get(key).map(|e| Self::is_expired(e, now_ms)).unwrap_or(false);
        if due {
            self.drop_key(key);
        }
        due
    }

    /// Read access: lazy-expire, then touch the LRU linkage.
    pub fn get_value(&mut self, key: &str, now_ms: u64) -> Option<&Value> {
        if self.expire_if_due(key, now_ms) {
            return None;
        }
        let entry = self.map.get(key)?;
        self.lru.touch(entry.slot);
        Some(&self.map.get(key)?.value)
    }

    pub fn contains(&mut self, key: &str, now_ms: u64) -> bool {
        !self.expire_if_due(key, now_ms) && self.map.contains_key(key)
    }

    pub fn type_of(&mut self, key: &str, now_ms: u64) -> Option<&'static str> {
        self.get_value(key, now_ms).map(Value::type_name)
    }

    /// Make room for `incoming` bytes. `none` rejects; the LRU and random
    /// policies evict until the write fits (or the keyspace is empty).
    fn reserve(&mut self, incoming: u64, protect: Option<&str>) -> Result<(), StoreError> {
        if self.max_memory == 0 {
            return Ok(());
        }
        while self.used + incoming > self.max_memory {
            match self.eviction {
                EvictionPolicy::None => return Err(StoreError::OutOfMemory),
                EvictionPolicy::AllkeysLru => {
                    let victim = match self.lru.tail_key() {
                        Some(tail) if Some(tail) != protect => tail.to_string(),
                        _ => return Err(StoreError::OutOfMemory),
                    };
                    self.drop_key(&victim);
                }
                EvictionPolicy::AllkeysRandom => {
                    let candidates: Vec<&String> =
                        self.map.keys().filter(|k| Some(k.as_str()) != protect).collect();
                    if candidates.is_empty() {
                        return Err(StoreError::OutOfMemory);
                    }
                    let pick = rand::thread_rng().gen_range(0..candidates.len());
                    let victim = candidates[pick].clone();
                    self.drop_key(&victim);
                }
            }
        }
        Ok(())
    }

    /// Insert or replace a whole entry (SET, snapshot load).
    pub fn put(
        &mut self,
        key: &str,
        value: Value,
        expires_at_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let incoming = Self::entry_size(key, &value);
        let current = self.map.get(key).map(|e| Self::entry_size(key, &e.value)).unwrap_or(0);
        self.reserve(incoming.saturating_sub(current), Some(key))?;

        match self.map.get_mut(key) {
            Some(entry) => {
                self.used = self.used.saturating_sub(current) + incoming;
                entry.value = value;
                entry.expires_at_ms = expires_at_ms;
                self.lru.touch(entry.slot);
            }
            None => {
                let slot = self.lru.insert_front(key.to_string());
                self.map.insert(key.to_string(), Entry { value, expires_at_ms, slot });
                self.used += incoming;
            }
        }
        Ok(())
    }

    /// Mutate an existing typed value in place, creating it with `init`
    /// when absent. Fails with a type conflict when the stored variant
    /// does not match what `mutate` expects (signalled by `mutate`).
    pub fn update<T>(
        &mut self,
        key: &str,
        now_ms: u64,
        init: impl FnOnce() -> Value,
        mutate: impl FnOnce(&mut Value) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.expire_if_due(key, now_ms);
        if !self.map.contains_key(key) {
            self.put(key, init(), None)?;
        }
        let before = self.map.get(key).map(|e| Self::entry_size(key, &e.value)).unwrap_or(0);
        let entry = match self.map.get_mut(key) {
            Some(entry) => entry,
            None => return Err(StoreError::OutOfMemory),
        };
        let result = mutate(&mut entry.value)?;
        let after = Self::entry_size(key, &entry.value);
        self.lru.touch(entry.slot);
        self.used = self.used.saturating_sub(before) + after;
        // Growth beyond the budget evicts other keys after the fact.
        if after > before {
            let _ = self.reserve(0, Some(key));
        }
        Ok(result)
    }

    pub fn delete(&mut self, key: &str, now_ms: u64) -> bool {
        if self.expire_if_due(key, now_ms) {
            return false;
        }
        let existed = self.map.contains_key(key);
        if existed {
            self.drop_key(key);
        }
        existed
    }

    /// Set an absolute expiry. False when the key is absent.
    pub fn expire_at(&mut self, key: &str, at_ms: u64, now_ms: u64) -> bool {
        if self.expire_if_due(key, now_ms) {
            return false;
        }
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = Some(at_ms);
                true
            }
            None => false,
        }
    }

    /// Remaining TTL: `None` for a missing key, `Some(None)` for no
    /// expiry, `Some(Some(ms))` otherwise.
    pub fn ttl_ms(&mut self, key: &str, now_ms: u64) -> Option<Option<u64>> {
        if self.expire_if_due(key, now_ms) {
            return None;
        }
        let entry = self.map.get(key)?;
        Some(entry.expires_at_ms.map(|at| at.saturating_sub(now_ms)))
    }

    /// Clear a key's expiry. False when absent or not expiring.
    pub fn persist(&mut self, key: &str, now_ms: u64) -> bool {
        if self.expire_if_due(key, now_ms) {
            return false;
        }
        match self.map.get_mut(key) {
            Some(entry) if entry.expires_at_ms.is_some() => {
                entry.expires_at_ms = None;
                true
            }
            _ => false,
        }
    }

    /// Purge everything expired, then count.
    pub fn size(&mut self, now_ms: u64) -> usize {
        let due: Vec<String> = self
            .map
            .iter()
            .filter(|(_, entry)| Self::is_expired(entry, now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            self.drop_key(&key);
        }
        self.map.len()
    }

    /// All keys matching a glob pattern (`*` lists everything).
    pub fn keys(&mut self, pattern: &str, now_ms: u64) -> Vec<String> {
        let mut matched: Vec<String> = self
            .map
            .iter()
            .filter(|(_, entry)| !Self::is_expired(entry, now_ms))
            .filter(|(key, _)| pattern == "*" || socketley_core::matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matched.sort();
        matched
    }

    /// Cursor scan over the sorted keyspace: returns the next cursor (0 at
    /// the end) and a page of keys.
    pub fn scan(&mut self, cursor: usize, count: usize, now_ms: u64) -> (usize, Vec<String>) {
        let all = self.keys("*", now_ms);
        let count = count.max(1);
        let page: Vec<String> = all.iter().skip(cursor).take(count).cloned().collect();
        let next = cursor + page.len();
        if next >= all.len() {
            (0, page)
        } else {
            (next, page)
        }
    }

    /// Background sweep: sample up to `sample` random keys with a TTL and
    /// drop the expired ones. Returns the dropped keys (expiry hooks fire
    /// on them).
    pub fn sweep_expired(&mut self, sample: usize, now_ms: u64) -> Vec<String> {
        let expiring: Vec<String> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.expires_at_ms.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        if expiring.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        let mut dropped = Vec::new();
        for _ in 0..sample.min(expiring.len()) {
            let key = &expiring[rng.gen_range(0..expiring.len())];
            if self.expire_if_due(key, now_ms) {
                dropped.push(key.clone());
            }
        }
        dropped.sort();
        dropped.dedup();
        dropped
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.lru = LruList::new();
        self.used = 0;
    }

    /// Snapshot iteration (expired entries skipped by the caller's clock).
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.map.iter()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
