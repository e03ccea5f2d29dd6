// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache command execution against the store.
//!
//! Commands are case-insensitive token lists, shared by the line protocol,
//! RESP mode, the linked-cache path and interactive sessions. Operations
//! that need connection or filesystem context (pub/sub, snapshots,
//! replication) escalate to the runtime layer instead of executing here.

use std::collections::{HashMap, HashSet, VecDeque};

use socketley_core::AccessMode;

use super::store::{Store, StoreError, Value};

/// Wire-independent reply; rendered by the line and RESP codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(&'static str),
    Int(i64),
    Bulk(Option<String>),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK")
    }

    pub fn nil() -> Self {
        Reply::Bulk(None)
    }

    pub fn bulk(value: impl Into<String>) -> Self {
        Reply::Bulk(Some(value.into()))
    }

    fn from_store_err(err: StoreError) -> Self {
        Reply::Error(err.to_string())
    }
}

/// Outcome of one command: either a direct reply or an escalation the
/// runtime layer must handle.
#[derive(Debug, PartialEq, Eq)]
pub enum Exec {
    Reply(Reply),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Publish { channel: String, message: String },
    Flush(Option<String>),
    Load(Option<String>),
    /// Replication handshake: the connection becomes a follower sink.
    Sync,
}

/// Render a reply for the newline protocol (no trailing LF).
pub fn render_line(reply: &Reply) -> String {
    match reply {
        Reply::Simple(s) => (*s).to_string(),
        Reply::Int(n) => n.to_string(),
        Reply::Bulk(None) => "nil".to_string(),
        Reply::Bulk(Some(s)) => s.clone(),
        Reply::Array(items) => {
            items.iter().map(render_line).collect::<Vec<_>>().join(" ")
        }
        Reply::Error(e) => format!("error: {}", e),
    }
}

/// True for commands the leader streams to its followers.
pub fn is_mutation(command: &str) -> bool {
    matches!(
        command,
        "SET" | "DEL" | "INCR" | "INCRBY" | "DECR" | "DECRBY" | "APPEND" | "GETSET" | "MSET"
            | "SETNX" | "SETEX" | "PSETEX" | "LPUSH" | "RPUSH" | "LPOP" | "RPOP" | "SADD"
            | "SREM" | "HSET" | "HDEL" | "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT"
            | "PERSIST"
    )
}

fn denied(access: AccessMode, command: &str) -> Option<Reply> {
    let admin_only = matches!(command, "FLUSH" | "LOAD");
    if admin_only && access != AccessMode::Admin {
        return Some(Reply::Error("admin only".to_string()));
    }
    if access == AccessMode::ReadOnly && is_mutation(command) {
        return Some(Reply::Error("read only".to_string()));
    }
    None
}

fn wrong_args(command: &str) -> Exec {
    Exec::Reply(Reply::Error(format!("wrong number of arguments for {}", command)))
}

/// Execute one tokenized command. `now_ms` drives every TTL decision.
pub fn execute(store: &mut Store, access: AccessMode, now_ms: u64, tokens: &[String]) -> Exec {
    let Some(first) = tokens.first() else {
        return Exec::Reply(Reply::Error("empty command".to_string()));
    };
    let command = first.to_ascii_uppercase();
    let args = &tokens[1..];

    if let Some(reply) = denied(access, &command) {
        return Exec::Reply(reply);
    }

    match command.as_str() {
        // Escalations.
        "SUBSCRIBE" if !args.is_empty() => Exec::Subscribe(args.to_vec()),
        "UNSUBSCRIBE" => Exec::Unsubscribe(args.to_vec()),
        "PUBLISH" if args.len() >= 2 => Exec::Publish {
            channel: args[0].clone(),
            message: args[1..].join(" "),
        },
        "FLUSH" => Exec::Flush(args.first().cloned()),
        "LOAD" => Exec::Load(args.first().cloned()),
        "SYNC" => Exec::Sync,

        _ => Exec::Reply(execute_store(store, access, now_ms, &command, args)),
    }
}

fn execute_store(
    store: &mut Store,
    _access: AccessMode,
    now_ms: u64,
    command: &str,
    args: &[String],
) -> Reply {
    match (command, args.len()) {
        ("GET", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Str(s)) => Reply::bulk(s.clone()),
            Some(_) => Reply::nil(),
            None => Reply::nil(),
        },
        ("SET", 2) => match store.put(&args[0], Value::Str(args[1].clone()), None) {
            Ok(()) => Reply::ok(),
            Err(err) => Reply::from_store_err(err),
        },
        ("SETNX", 2) => {
            if store.contains(&args[0], now_ms) {
                Reply::Int(0)
            } else {
                match store.put(&args[0], Value::Str(args[1].clone()), None) {
                    Ok(()) => Reply::Int(1),
                    Err(err) => Reply::from_store_err(err),
                }
            }
        }
        ("SETEX", 3) => match args[1].parse::<u64>() {
            Ok(secs) => {
                let at = now_ms + secs * 1000;
                match store.put(&args[0], Value::Str(args[2].clone()), Some(at)) {
                    Ok(()) => Reply::ok(),
                    Err(err) => Reply::from_store_err(err),
                }
            }
            Err(_) => Reply::Error("value is not an integer".to_string()),
        },
        ("PSETEX", 3) => match args[1].parse::<u64>() {
            Ok(ms) => match store.put(&args[0], Value::Str(args[2].clone()), Some(now_ms + ms)) {
                Ok(()) => Reply::ok(),
                Err(err) => Reply::from_store_err(err),
            },
            Err(_) => Reply::Error("value is not an integer".to_string()),
        },
        ("GETSET", 2) => {
            let prior = match store.get_value(&args[0], now_ms) {
                Some(Value::Str(s)) => Reply::bulk(s.clone()),
                Some(_) => return Reply::Error(StoreError::TypeConflict.to_string()),
                None => Reply::nil(),
            };
            match store.put(&args[0], Value::Str(args[1].clone()), None) {
                Ok(()) => prior,
                Err(err) => Reply::from_store_err(err),
            }
        }
        ("DEL", n) if n >= 1 => {
            let removed = args.iter().filter(|key| store.delete(key, now_ms)).count();
            Reply::Int(removed as i64)
        }
        ("EXISTS", n) if n >= 1 => {
            let present = args.iter().filter(|key| store.contains(key, now_ms)).count();
            Reply::Int(present as i64)
        }
        ("INCR", 1) => incr_by(store, &args[0], 1, now_ms),
        ("DECR", 1) => incr_by(store, &args[0], -1, now_ms),
        ("INCRBY", 2) => match args[1].parse::<i64>() {
            Ok(delta) => incr_by(store, &args[0], delta, now_ms),
            Err(_) => Reply::Error(StoreError::NotInteger.to_string()),
        },
        ("DECRBY", 2) => match args[1].parse::<i64>() {
            Ok(delta) => incr_by(store, &args[0], -delta, now_ms),
            Err(_) => Reply::Error(StoreError::NotInteger.to_string()),
        },
        ("APPEND", 2) => {
            let result = store.update(
                &args[0],
                now_ms,
                || Value::Str(String::new()),
                |value| match value {
                    Value::Str(s) => {
                        s.push_str(&args[1]);
                        Ok(s.len() as i64)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("STRLEN", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Str(s)) => Reply::Int(s.len() as i64),
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Int(0),
        },
        ("MGET", n) if n >= 1 => Reply::Array(
            args.iter()
                .map(|key| match store.get_value(key, now_ms) {
                    Some(Value::Str(s)) => Reply::bulk(s.clone()),
                    _ => Reply::nil(),
                })
                .collect(),
        ),
        ("MSET", n) if n >= 2 && n % 2 == 0 => {
            for pair in args.chunks(2) {
                if let Err(err) = store.put(&pair[0], Value::Str(pair[1].clone()), None) {
                    return Reply::from_store_err(err);
                }
            }
            Reply::ok()
        }
        ("TYPE", 1) => match store.type_of(&args[0], now_ms) {
            Some(name) => Reply::Simple(name),
            None => Reply::Simple("none"),
        },
        ("KEYS", 1) => {
            Reply::Array(store.keys(&args[0], now_ms).into_iter().map(Reply::bulk).collect())
        }
        ("SCAN", n) if n == 1 || n == 2 => {
            let cursor = match args[0].parse::<usize>() {
                Ok(cursor) => cursor,
                Err(_) => return Reply::Error(StoreError::NotInteger.to_string()),
            };
            let count = args
                .get(1)
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(10);
            let (next, page) = store.scan(cursor, count, now_ms);
            Reply::Array(vec![
                Reply::bulk(next.to_string()),
                Reply::Array(page.into_iter().map(Reply::bulk).collect()),
            ])
        }

        // Lists.
        ("LPUSH", n) | ("RPUSH", n) if n >= 2 => {
            let front = command == "LPUSH";
            let result = store.update(
                &args[0],
                now_ms,
                || Value::List(VecDeque::new()),
                |value| match value {
                    Value::List(items) => {
                        for item in &args[1..] {
                            if front {
                                items.push_front(item.clone());
                            } else {
                                items.push_back(item.clone());
                            }
                        }
                        Ok(items.len() as i64)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("LPOP", 1) | ("RPOP", 1) => {
            let front = command == "LPOP";
            if !store.contains(&args[0], now_ms) {
                return Reply::nil();
            }
            let result = store.update(
                &args[0],
                now_ms,
                || Value::List(VecDeque::new()),
                |value| match value {
                    Value::List(items) => {
                        Ok(if front { items.pop_front() } else { items.pop_back() })
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            match result {
                Ok(Some(item)) => Reply::bulk(item),
                Ok(None) => Reply::nil(),
                Err(err) => Reply::from_store_err(err),
            }
        }
        ("LLEN", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::List(items)) => Reply::Int(items.len() as i64),
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Int(0),
        },
        ("LRANGE", 3) => {
            let (start, stop) = match (args[1].parse::<i64>(), args[2].parse::<i64>()) {
                (Ok(start), Ok(stop)) => (start, stop),
                _ => return Reply::Error(StoreError::NotInteger.to_string()),
            };
            match store.get_value(&args[0], now_ms) {
                Some(Value::List(items)) => {
                    let len = items.len() as i64;
                    let from = clamp_index(start, len);
                    let to = clamp_index(stop, len);
                    if from > to || len == 0 {
                        return Reply::Array(Vec::new());
                    }
                    Reply::Array(
                        items
                            .iter()
                            .skip(from as usize)
                            .take((to - from + 1) as usize)
                            .map(|item| Reply::bulk(item.clone()))
                            .collect(),
                    )
                }
                Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
                None => Reply::Array(Vec::new()),
            }
        }
        ("LINDEX", 2) => {
            let index = match args[1].parse::<i64>() {
                Ok(index) => index,
                Err(_) => return Reply::Error(StoreError::NotInteger.to_string()),
            };
            match store.get_value(&args[0], now_ms) {
                Some(Value::List(items)) => {
                    let len = items.len() as i64;
                    let at = if index < 0 { len + index } else { index };
                    if at < 0 || at >= len {
                        Reply::nil()
                    } else {
                        items
                            .get(at as usize)
                            .map(|item| Reply::bulk(item.clone()))
                            .unwrap_or_else(Reply::nil)
                    }
                }
                Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
                None => Reply::nil(),
            }
        }

        // Sets.
        ("SADD", n) if n >= 2 => {
            let result = store.update(
                &args[0],
                now_ms,
                || Value::Set(HashSet::new()),
                |value| match value {
                    Value::Set(items) => {
                        let added =
                            args[1..].iter().filter(|item| items.insert((*item).clone())).count();
                        Ok(added as i64)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("SREM", n) if n >= 2 => {
            if !store.contains(&args[0], now_ms) {
                return Reply::Int(0);
            }
            let result = store.update(
                &args[0],
                now_ms,
                || Value::Set(HashSet::new()),
                |value| match value {
                    Value::Set(items) => {
                        let removed =
                            args[1..].iter().filter(|item| items.remove(*item)).count();
                        Ok(removed as i64)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("SCARD", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Set(items)) => Reply::Int(items.len() as i64),
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Int(0),
        },
        ("SISMEMBER", 2) => match store.get_value(&args[0], now_ms) {
            Some(Value::Set(items)) => Reply::Int(items.contains(&args[1]) as i64),
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Int(0),
        },
        ("SMEMBERS", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Set(items)) => {
                let mut members: Vec<String> = items.iter().cloned().collect();
                members.sort();
                Reply::Array(members.into_iter().map(Reply::bulk).collect())
            }
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Array(Vec::new()),
        },

        // Hashes.
        ("HSET", n) if n >= 3 && (n - 1) % 2 == 0 => {
            let result = store.update(
                &args[0],
                now_ms,
                || Value::Hash(HashMap::new()),
                |value| match value {
                    Value::Hash(map) => {
                        let mut created = 0;
                        for pair in args[1..].chunks(2) {
                            if map.insert(pair[0].clone(), pair[1].clone()).is_none() {
                                created += 1;
                            }
                        }
                        Ok(created)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("HGET", 2) => match store.get_value(&args[0], now_ms) {
            Some(Value::Hash(map)) => {
                map.get(&args[1]).map(|v| Reply::bulk(v.clone())).unwrap_or_else(Reply::nil)
            }
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::nil(),
        },
        ("HDEL", n) if n >= 2 => {
            if !store.contains(&args[0], now_ms) {
                return Reply::Int(0);
            }
            let result = store.update(
                &args[0],
                now_ms,
                || Value::Hash(HashMap::new()),
                |value| match value {
                    Value::Hash(map) => {
                        let removed =
                            args[1..].iter().filter(|field| map.remove(*field).is_some()).count();
                        Ok(removed as i64)
                    }
                    _ => Err(StoreError::TypeConflict),
                },
            );
            int_or_err(result)
        }
        ("HLEN", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Hash(map)) => Reply::Int(map.len() as i64),
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Int(0),
        },
        ("HGETALL", 1) => match store.get_value(&args[0], now_ms) {
            Some(Value::Hash(map)) => {
                let mut fields: Vec<(String, String)> =
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                fields.sort();
                let mut flat = Vec::with_capacity(fields.len() * 2);
                for (field, value) in fields {
                    flat.push(Reply::bulk(field));
                    flat.push(Reply::bulk(value));
                }
                Reply::Array(flat)
            }
            Some(_) => Reply::Error(StoreError::TypeConflict.to_string()),
            None => Reply::Array(Vec::new()),
        },

        // Expiry.
        ("EXPIRE", 2) | ("PEXPIRE", 2) => match args[1].parse::<u64>() {
            Ok(n) => {
                let delta = if command == "EXPIRE" { n * 1000 } else { n };
                Reply::Int(store.expire_at(&args[0], now_ms + delta, now_ms) as i64)
            }
            Err(_) => Reply::Error(StoreError::NotInteger.to_string()),
        },
        ("EXPIREAT", 2) | ("PEXPIREAT", 2) => match args[1].parse::<u64>() {
            Ok(n) => {
                let at = if command == "EXPIREAT" { n * 1000 } else { n };
                Reply::Int(store.expire_at(&args[0], at, now_ms) as i64)
            }
            Err(_) => Reply::Error(StoreError::NotInteger.to_string()),
        },
        ("TTL", 1) | ("PTTL", 1) => match store.ttl_ms(&args[0], now_ms) {
            None => Reply::Int(-2),
            Some(None) => Reply::Int(-1),
            Some(Some(ms)) => {
                Reply::Int(if command == "TTL" { (ms / 1000) as i64 } else { ms as i64 })
            }
        },
        ("PERSIST", 1) => Reply::Int(store.persist(&args[0], now_ms) as i64),

        // Introspection.
        ("SIZE", 0) => Reply::Int(store.size(now_ms) as i64),
        ("MEMORY", 0) => Reply::Int(store.memory_used() as i64),

        ("GET", _) | ("SET", _) | ("SETNX", _) | ("SETEX", _) | ("PSETEX", _) | ("GETSET", _)
        | ("DEL", _) | ("EXISTS", _) | ("INCR", _) | ("DECR", _) | ("INCRBY", _)
        | ("DECRBY", _) | ("APPEND", _) | ("STRLEN", _) | ("MGET", _) | ("MSET", _)
        | ("TYPE", _) | ("KEYS", _) | ("SCAN", _) | ("LPUSH", _) | ("RPUSH", _) | ("LPOP", _)
        | ("RPOP", _) | ("LLEN", _) | ("LRANGE", _) | ("LINDEX", _) | ("SADD", _)
        | ("SREM", _) | ("SCARD", _) | ("SISMEMBER", _) | ("SMEMBERS", _) | ("HSET", _)
        | ("HGET", _) | ("HDEL", _) | ("HLEN", _) | ("HGETALL", _) | ("EXPIRE", _)
        | ("PEXPIRE", _) | ("EXPIREAT", _) | ("PEXPIREAT", _) | ("TTL", _) | ("PTTL", _)
        | ("PERSIST", _) | ("SIZE", _) | ("MEMORY", _) | ("SUBSCRIBE", _) | ("PUBLISH", _) => {
            match wrong_args(command) {
                Exec::Reply(reply) => reply,
                _ => Reply::Error("bad arguments".to_string()),
            }
        }

        _ => Reply::Error(format!("unknown command: {}", command)),
    }
}

fn incr_by(store: &mut Store, key: &str, delta: i64, now_ms: u64) -> Reply {
    let result = store.update(
        key,
        now_ms,
        || Value::Str("0".to_string()),
        |value| match value {
            Value::Str(s) => {
                let current: i64 = if s.is_empty() {
                    0
                } else {
                    s.parse().map_err(|_| StoreError::NotInteger)?
                };
                let next = current.saturating_add(delta);
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(StoreError::TypeConflict),
        },
    );
    int_or_err(result)
}

fn int_or_err(result: Result<i64, StoreError>) -> Reply {
    match result {
        Ok(n) => Reply::Int(n),
        Err(err) => Reply::from_store_err(err),
    }
}

/// Redis-style range index clamping (negative indexes from the tail).
fn clamp_index(index: i64, len: i64) -> i64 {
    let at = if index < 0 { len + index } else { index };
    at.clamp(0, len.saturating_sub(1).max(0))
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
