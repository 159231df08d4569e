//! Forward Proxy Pool
//!
//! Ordered rotation over a set of forward proxies with a persistent
//! blacklist. The pool holds pure state: it performs no I/O of its own, and
//! every mutation is observable through [`EngineEvent`]s.
//!
//! # Design Philosophy
//!
//! Rotation is insertion-ordered and cursor-based: `next()` walks forward
//! from the cursor, wrapping at most once, and skips blacklisted entries.
//! A blacklisted proxy never comes back on its own - only
//! [`ProxyPool::clear_blacklist`] (or a process restart) recovers it. The
//! pool is owned by one engine; there is no cross-engine sharing to
//! synchronize.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::events::{EngineEvent, EventSink};

/// One forward proxy, identified by its `host:port` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Basic-auth user, when the proxy requires credentials.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
}

impl Proxy {
    /// Proxy without credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Proxy with basic-auth credentials.
    #[must_use]
    pub fn with_credentials(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Parse one proxy-list line: `host:port` or `host:port:user:pass`.
    ///
    /// Anything else (wrong field count, empty host, non-numeric port)
    /// returns `None`; the pool loader drops such lines.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split(':').collect();
        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => (
                *host,
                *port,
                Some((*user).to_string()),
                Some((*pass).to_string()),
            ),
            _ => return None,
        };
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Some(Self {
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// Rotation identity: `host:port`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether credentials are attached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// URL form handed to the HTTP client (`http://host:port`).
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why the pool could not hand out a proxy.
///
/// The two cases are deliberately distinct: an empty pool means the caller
/// never configured proxies (direct connection is the sensible fallback),
/// while a fully blacklisted pool means every configured proxy failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProxyPoolError {
    /// The pool holds no proxies at all.
    #[error("no proxies configured")]
    NoneConfigured,
    /// Every configured proxy is blacklisted.
    #[error("all proxies are blacklisted")]
    AllBlacklisted,
}

/// Point-in-time pool counters for state snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyPoolStats {
    /// Proxies configured.
    pub total: usize,
    /// Proxies currently usable.
    pub available: usize,
    /// Configured proxies currently blacklisted.
    pub blacklisted: usize,
    /// Key at the cursor, unless unset or blacklisted.
    pub current: Option<String>,
}

/// Insertion-ordered proxy rotation with a persistent blacklist.
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<Proxy>,
    /// Blacklisted key -> first reason observed.
    blacklist: HashMap<String, String>,
    cursor: Option<usize>,
    events: EventSink,
}

impl ProxyPool {
    /// Empty pool publishing to `events`.
    #[must_use]
    pub fn new(events: EventSink) -> Self {
        Self {
            proxies: Vec::new(),
            blacklist: HashMap::new(),
            cursor: None,
            events,
        }
    }

    /// Replace the pool contents with proxies parsed from `source`.
    ///
    /// One proxy per line (`host:port` or `host:port:user:pass`); blank
    /// lines and `#` comments are skipped, malformed lines are dropped
    /// silently. The cursor resets; the blacklist survives, since identity
    /// is `host:port` and a reloaded bad proxy is still bad. Returns the
    /// number of proxies loaded.
    pub fn load(&mut self, source: &str) -> usize {
        let mut proxies = Vec::new();
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Proxy::parse(line) {
                Some(proxy) => proxies.push(proxy),
                None => debug!(line, "dropping malformed proxy line"),
            }
        }
        self.proxies = proxies;
        self.cursor = None;
        let count = self.proxies.len();
        self.events.emit(EngineEvent::ProxiesLoaded { count });
        count
    }

    /// Append one proxy. Duplicate keys are allowed.
    pub fn add(&mut self, proxy: Proxy) {
        self.events.emit(EngineEvent::ProxyAdded { key: proxy.key() });
        self.proxies.push(proxy);
    }

    /// Advance the cursor to the next non-blacklisted proxy and return it.
    ///
    /// Walks forward from the cursor, wrapping at most once; never returns a
    /// blacklisted entry and never loops beyond one full scan.
    pub fn next(&mut self) -> Result<&Proxy, ProxyPoolError> {
        if self.proxies.is_empty() {
            return Err(ProxyPoolError::NoneConfigured);
        }
        let len = self.proxies.len();
        let start = self.cursor.map_or(0, |cursor| (cursor + 1) % len);
        for offset in 0..len {
            let index = (start + offset) % len;
            let key = self.proxies[index].key();
            if !self.blacklist.contains_key(&key) {
                self.cursor = Some(index);
                self.events.emit(EngineEvent::ProxySwitched { key });
                return Ok(&self.proxies[index]);
            }
        }
        Err(ProxyPoolError::AllBlacklisted)
    }

    /// Proxy at the cursor, unless the cursor is unset or the entry has
    /// since been blacklisted.
    #[must_use]
    pub fn current(&self) -> Option<&Proxy> {
        let proxy = self.proxies.get(self.cursor?)?;
        if self.blacklist.contains_key(&proxy.key()) {
            None
        } else {
            Some(proxy)
        }
    }

    /// Blacklist a key. Idempotent: repeat calls neither grow the set nor
    /// re-emit events. `reason` is recorded for observability only.
    pub fn blacklist(&mut self, key: &str, reason: &str) {
        if self.blacklist.contains_key(key) {
            return;
        }
        self.blacklist
            .insert(key.to_string(), reason.to_string());
        self.events.emit(EngineEvent::ProxyBlacklisted {
            key: key.to_string(),
            reason: reason.to_string(),
        });
        if !self.proxies.is_empty() && self.available() == 0 {
            self.events.emit(EngineEvent::ProxiesExhausted);
        }
    }

    /// Drop every blacklist entry; returns how many were cleared.
    pub fn clear_blacklist(&mut self) -> usize {
        let cleared = self.blacklist.len();
        self.blacklist.clear();
        cleared
    }

    /// First reason recorded for a blacklisted key.
    #[must_use]
    pub fn blacklist_reason(&self, key: &str) -> Option<&str> {
        self.blacklist.get(key).map(String::as_str)
    }

    /// Whether `key` is currently blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, key: &str) -> bool {
        self.blacklist.contains_key(key)
    }

    /// Number of proxies configured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True when no proxies are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Number of non-blacklisted proxies.
    #[must_use]
    pub fn available(&self) -> usize {
        self.proxies
            .iter()
            .filter(|proxy| !self.blacklist.contains_key(&proxy.key()))
            .count()
    }

    /// Counters for state snapshots.
    #[must_use]
    pub fn stats(&self) -> ProxyPoolStats {
        let available = self.available();
        ProxyPoolStats {
            total: self.proxies.len(),
            available,
            blacklisted: self.proxies.len() - available,
            current: self.current().map(Proxy::key),
        }
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(EventSink::disabled())
    }
}
