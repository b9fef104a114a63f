//! Shared counter store: the one network dependency of the control plane
//!
//! Rate-limit counters, security-violation counters, and the feature flag
//! cache all go through this store so those decisions are consistent across
//! service instances. Every operation is self-contained (increment+expire,
//! get, set+expire) and idempotent-safe to retry; no cross-key transactions
//! are required.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::Result;
use crate::config::StoreConfig;

/// Atomic key/value store with TTL semantics.
///
/// Implementations must guarantee that `incr_with_expiry` is atomic per key
/// so concurrent requests from the same client never under-count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment a counter and (re)arm its expiry; returns the new value.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Increment several counters in a single pipelined round-trip.
    ///
    /// Returns the new values in input order.
    async fn incr_many_with_expiry(&self, entries: &[(String, Duration)]) -> Result<Vec<u64>>;

    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a bounded TTL.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Liveness probe for readiness reporting.
    async fn ping(&self) -> Result<()>;
}

/// Redis-backed store shared across service instances.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect using the configured URL and key prefix.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        info!(url = %config.url, prefix = %config.key_prefix, "Connected to counter store");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let key = self.key(key);
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&key, 1u64)
            .expire(&key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn incr_many_with_expiry(&self, entries: &[(String, Duration)]) -> Result<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for (key, ttl) in entries {
            let key = self.key(key);
            pipe.incr(&key, 1u64);
            pipe.expire(&key, ttl.as_secs() as i64).ignore();
        }

        let counts: Vec<u64> = pipe.query_async(&mut conn).await?;
        Ok(counts)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&key).await?;
        Ok(value)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// In-process store for tests and single-instance deployments.
///
/// Mirrors the store contract including INCR-on-string semantics: a counter
/// is a stringified integer, and incrementing a non-numeric value restarts
/// it at 1.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn incr_entry(&self, key: &str, ttl: Duration) -> u64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: None,
        });

        if entry.is_expired() {
            entry.value = "0".to_string();
        }

        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        entry.expires_at = Some(Instant::now() + ttl);
        count
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        Ok(self.incr_entry(key, ttl))
    }

    async fn incr_many_with_expiry(&self, entries: &[(String, Duration)]) -> Result<Vec<u64>> {
        Ok(entries
            .iter()
            .map(|(key, ttl)| self.incr_entry(key, *ttl))
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                debug!(key, "Expired entry evicted");
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
