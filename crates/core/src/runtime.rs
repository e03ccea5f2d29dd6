// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime records: kinds, lifecycle states, configuration, persisted spec.
//!
//! A runtime is the daemon's central entity. Common fields live on
//! [`RuntimeConfig`]; per-kind payload lives in the [`KindConfig`] variant
//! arm. Cross-runtime references (proxy backend by runtime name, server
//! linked cache, sub-server routing) are stored as names and resolved
//! through the registry, never as pointers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::RuntimeId;

/// Per-connection read accumulator cap. Exceeding it closes the connection.
pub const PARTIAL_BUFFER_CAP: usize = 1024 * 1024;

/// Per-connection write queue cap, in queued blobs.
pub const WRITE_QUEUE_CAP: usize = 4096;

/// Maximum blobs drained from the write queue per writer wake.
pub const WRITE_BATCH: usize = 32;

/// Backoff after an accept fails with EMFILE/ENFILE.
pub const ACCEPT_BACKOFF_MS: u64 = 100;

/// Bound on the UDP peer table.
pub const UDP_PEER_CAP: usize = 10_000;

/// Default ceiling on concurrent connections per runtime.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8192;

/// The four runtime kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Server,
    Client,
    Proxy,
    Cache,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeKind::Server => "server",
            RuntimeKind::Client => "client",
            RuntimeKind::Proxy => "proxy",
            RuntimeKind::Cache => "cache",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RuntimeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(RuntimeKind::Server),
            "client" => Ok(RuntimeKind::Client),
            "proxy" => Ok(RuntimeKind::Proxy),
            "cache" => Ok(RuntimeKind::Cache),
            other => Err(ConfigError::BadValue { key: "type".into(), value: other.into() }),
        }
    }
}

/// Lifecycle state of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    #[default]
    Created,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeState::Created => "created",
            RuntimeState::Running => "running",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What happens to a child runtime when its owner stops or is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChildPolicy {
    #[default]
    Stop,
    Remove,
}

impl FromStr for ChildPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(ChildPolicy::Stop),
            "remove" => Ok(ChildPolicy::Remove),
            other => Err(ConfigError::BadValue { key: "child-policy".into(), value: other.into() }),
        }
    }
}

/// Server message dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Deliver to hooks, then broadcast to all other connections.
    #[default]
    Inout,
    /// Deliver to hooks only.
    In,
    /// Drop incoming messages.
    Out,
    /// Only the authenticated master may broadcast.
    Master,
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inout" => Ok(ServerMode::Inout),
            "in" => Ok(ServerMode::In),
            "out" => Ok(ServerMode::Out),
            "master" => Ok(ServerMode::Master),
            other => Err(ConfigError::BadValue { key: "mode".into(), value: other.into() }),
        }
    }
}

/// Listener transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(ConfigError::BadValue { key: "transport".into(), value: other.into() }),
        }
    }
}

/// Cache access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
    Admin,
}

impl FromStr for AccessMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(AccessMode::ReadOnly),
            "readwrite" => Ok(AccessMode::ReadWrite),
            "admin" => Ok(AccessMode::Admin),
            other => Err(ConfigError::BadValue { key: "access".into(), value: other.into() }),
        }
    }
}

/// Cache eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Reject writes once the memory budget is exceeded.
    #[default]
    None,
    AllkeysLru,
    AllkeysRandom,
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EvictionPolicy::None),
            "allkeys-lru" => Ok(EvictionPolicy::AllkeysLru),
            "allkeys-random" => Ok(EvictionPolicy::AllkeysRandom),
            other => Err(ConfigError::BadValue { key: "eviction".into(), value: other.into() }),
        }
    }
}

/// Proxy backend selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl FromStr for SelectStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(SelectStrategy::RoundRobin),
            "random" => Ok(SelectStrategy::Random),
            other => Err(ConfigError::BadValue { key: "strategy".into(), value: other.into() }),
        }
    }
}

/// Server-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: Transport,
    pub mode: ServerMode,
    /// Master-mode shared secret. `None` delegates to the on_auth hook.
    pub master_secret: Option<String>,
    /// Forward non-master messages to the master instead of dropping them.
    pub forward_to_master: bool,
    /// Static file directory; enables HTTP serving for non-upgrade requests.
    pub static_dir: Option<PathBuf>,
    /// Pre-build responses for the static directory at setup.
    pub static_cache: bool,
    /// Cache runtime executing `cache `-prefixed messages.
    pub linked_cache: Option<String>,
    /// Cache runtime storing every message under a monotonic key.
    pub store_cache: Option<String>,
    /// Sub-server receiving every accepted connection's messages.
    pub route_to: Option<String>,
    /// Outbound upstream targets (`host:port`), each with its own reconnect.
    pub upstreams: Vec<String>,
}

/// Client-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: Transport,
    /// Target `host:port`.
    pub target: String,
}

/// Proxy-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP mode (request-line rewrite) vs raw TCP forwarding.
    pub http: bool,
    /// Backend entries: `host:port`, a runtime name, or `group:<label>`.
    pub backends: Vec<String>,
    pub strategy: SelectStrategy,
    /// Health check interval in seconds; 0 disables checking.
    pub health_interval_secs: u64,
    /// HTTP health path; `None` means plain TCP connect probes.
    pub health_path: Option<String>,
    /// Consecutive failures before a backend is marked unhealthy.
    pub health_threshold: u32,
    /// Errors before the circuit opens.
    pub circuit_threshold: u32,
    /// Seconds an open circuit waits before going half-open.
    pub circuit_timeout_secs: u64,
    /// Retries against a different backend before giving up.
    pub retries: u32,
    /// Retry non-idempotent methods too.
    pub retry_all: bool,
    /// Keep-alive pool cap per backend.
    pub pool_size: usize,
    /// Seconds before an idle pooled connection is closed.
    pub pool_idle_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http: true,
            backends: Vec::new(),
            strategy: SelectStrategy::RoundRobin,
            health_interval_secs: 0,
            health_path: None,
            health_threshold: 3,
            circuit_threshold: 5,
            circuit_timeout_secs: 30,
            retries: 1,
            retry_all: false,
            pool_size: 8,
            pool_idle_secs: 60,
        }
    }
}

/// Cache-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub access: AccessMode,
    /// Approximate memory budget in bytes; 0 means unlimited.
    pub max_memory: u64,
    pub eviction: EvictionPolicy,
    /// Snapshot path; implies implicit LOAD at start and default FLUSH target.
    pub persist_path: Option<PathBuf>,
    /// Force RESP wire mode instead of auto-detecting on `*`.
    pub resp: bool,
    /// Leader `host:port` to replicate from.
    pub replicate_from: Option<String>,
}

/// Per-kind configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KindConfig {
    Server(ServerConfig),
    Client(ClientConfig),
    Proxy(ProxyConfig),
    Cache(CacheConfig),
}

impl KindConfig {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            KindConfig::Server(_) => RuntimeKind::Server,
            KindConfig::Client(_) => RuntimeKind::Client,
            KindConfig::Proxy(_) => RuntimeKind::Proxy,
            KindConfig::Cache(_) => RuntimeKind::Cache,
        }
    }
}

impl Default for KindConfig {
    fn default() -> Self {
        KindConfig::Server(ServerConfig::default())
    }
}

/// Full runtime configuration: common fields plus the per-kind payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub port: u16,
    pub log_file: Option<PathBuf>,
    pub write_file: Option<PathBuf>,
    pub max_connections: usize,
    /// Per-connection rate ceiling in messages/second; 0 disables.
    pub conn_rate: u32,
    /// Global rate ceiling in messages/second; 0 disables.
    pub global_rate: u32,
    /// Idle sweep threshold in seconds; 0 disables.
    pub idle_timeout_secs: u64,
    /// Drain queued writes before closing on stop.
    pub drain_on_stop: bool,
    pub reconnect: bool,
    /// Reconnect attempt ceiling; 0 means unlimited.
    pub max_reconnects: u32,
    pub tls: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub group: Option<String>,
    /// Owning runtime name (ownership graph).
    pub owner: Option<String>,
    pub child_policy: ChildPolicy,
    #[serde(flatten)]
    pub kind: KindConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 0,
            log_file: None,
            write_file: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            conn_rate: 0,
            global_rate: 0,
            idle_timeout_secs: 0,
            drain_on_stop: false,
            reconnect: true,
            max_reconnects: 0,
            tls: false,
            tls_cert: None,
            tls_key: None,
            group: None,
            owner: None,
            child_policy: ChildPolicy::Stop,
            kind: KindConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new(kind: RuntimeKind) -> Self {
        let kind = match kind {
            RuntimeKind::Server => KindConfig::Server(ServerConfig::default()),
            RuntimeKind::Client => KindConfig::Client(ClientConfig::default()),
            RuntimeKind::Proxy => KindConfig::Proxy(ProxyConfig::default()),
            RuntimeKind::Cache => KindConfig::Cache(CacheConfig::default()),
        };
        Self { kind, ..Self::default() }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind.kind()
    }

    /// Apply one `edit` key. Fields the engine cannot change under live I/O
    /// are rejected while the runtime is running.
    pub fn apply(&mut self, key: &str, value: &str, running: bool) -> Result<(), ConfigError> {
        const IMMUTABLE_WHILE_RUNNING: &[&str] = &[
            "port",
            "transport",
            "tls",
            "tls-cert",
            "tls-key",
            "target",
            "backends",
            "proxy-mode",
            "resp",
            "replicate-from",
        ];
        if running && IMMUTABLE_WHILE_RUNNING.contains(&key) {
            return Err(ConfigError::ImmutableWhileRunning { key: key.into() });
        }

        match key {
            "port" => self.port = parse_num::<u16>(key, value)?,
            "log-file" => self.log_file = opt_path(value),
            "write-file" => self.write_file = opt_path(value),
            "max-conns" => self.max_connections = parse_num::<usize>(key, value)?,
            "rate" => self.conn_rate = parse_num::<u32>(key, value)?,
            "global-rate" => self.global_rate = parse_num::<u32>(key, value)?,
            "idle-timeout" => self.idle_timeout_secs = parse_num::<u64>(key, value)?,
            "drain" => self.drain_on_stop = parse_bool(key, value)?,
            "reconnect" => self.reconnect = parse_bool(key, value)?,
            "max-reconnects" => self.max_reconnects = parse_num::<u32>(key, value)?,
            "tls" => self.tls = parse_bool(key, value)?,
            "tls-cert" => self.tls_cert = opt_path(value),
            "tls-key" => self.tls_key = opt_path(value),
            "group" => self.group = opt_string(value),
            "child-policy" => self.child_policy = value.parse()?,
            _ => return self.apply_kind(key, value),
        }
        Ok(())
    }

    fn apply_kind(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match &mut self.kind {
            KindConfig::Server(s) => match key {
                "transport" => s.transport = value.parse()?,
                "mode" => s.mode = value.parse()?,
                "master-secret" => s.master_secret = opt_string(value),
                "forward-to-master" => s.forward_to_master = parse_bool(key, value)?,
                "static-dir" => s.static_dir = opt_path(value),
                "static-cache" => s.static_cache = parse_bool(key, value)?,
                "cache" => s.linked_cache = opt_string(value),
                "store-cache" => s.store_cache = opt_string(value),
                "route-to" => s.route_to = opt_string(value),
                "upstreams" => s.upstreams = parse_list(value),
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            },
            KindConfig::Client(c) => match key {
                "transport" => c.transport = value.parse()?,
                "target" => c.target = value.to_string(),
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            },
            KindConfig::Proxy(p) => match key {
                "proxy-mode" => {
                    p.http = match value {
                        "http" => true,
                        "tcp" => false,
                        other => {
                            return Err(ConfigError::BadValue {
                                key: key.into(),
                                value: other.into(),
                            })
                        }
                    }
                }
                "backends" => p.backends = parse_list(value),
                "strategy" => p.strategy = value.parse()?,
                "health-interval" => p.health_interval_secs = parse_num::<u64>(key, value)?,
                "health-path" => p.health_path = opt_string(value),
                "health-threshold" => p.health_threshold = parse_num::<u32>(key, value)?,
                "circuit-threshold" => p.circuit_threshold = parse_num::<u32>(key, value)?,
                "circuit-timeout" => p.circuit_timeout_secs = parse_num::<u64>(key, value)?,
                "retries" => p.retries = parse_num::<u32>(key, value)?,
                "retry-all" => p.retry_all = parse_bool(key, value)?,
                "pool-size" => p.pool_size = parse_num::<usize>(key, value)?,
                "pool-idle" => p.pool_idle_secs = parse_num::<u64>(key, value)?,
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            },
            KindConfig::Cache(c) => match key {
                "access" => c.access = value.parse()?,
                "max-memory" => c.max_memory = parse_size(key, value)?,
                "eviction" => c.eviction = value.parse()?,
                "persist-path" => c.persist_path = opt_path(value),
                "resp" => c.resp = parse_bool(key, value)?,
                "replicate-from" => c.replicate_from = opt_string(value),
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            },
        }
        Ok(())
    }
}

/// Persisted record: one JSON sidecar per runtime name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub id: RuntimeId,
    pub name: String,
    pub created_at_ms: u64,
    pub was_running: bool,
    pub config: RuntimeConfig,
    /// Arbitrary labels attached via `edit meta.<key>`.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Configuration errors, surfaced to the control channel as status 1.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown option: {key}")]
    UnknownKey { key: String },

    #[error("bad value for {key}: {value}")]
    BadValue { key: String, value: String },

    #[error("cannot edit {key} while running")]
    ImmutableWhileRunning { key: String },
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::BadValue { key: key.into(), value: value.into() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" => Ok(false),
        other => Err(ConfigError::BadValue { key: key.into(), value: other.into() }),
    }
}

/// Parse a byte size with an optional `K`/`M`/`G` suffix.
fn parse_size(key: &str, value: &str) -> Result<u64, ConfigError> {
    let bad = || ConfigError::BadValue { key: key.into(), value: value.into() };
    let (digits, mult) = match value.as_bytes().last() {
        Some(b'K') | Some(b'k') => (&value[..value.len() - 1], 1024),
        Some(b'M') | Some(b'm') => (&value[..value.len() - 1], 1024 * 1024),
        Some(b'G') | Some(b'g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits.parse::<u64>().map(|n| n * mult).map_err(|_| bad())
}

fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn opt_string(value: &str) -> Option<String> {
    if value.is_empty() || value == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

fn opt_path(value: &str) -> Option<PathBuf> {
    opt_string(value).map(PathBuf::from)
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
