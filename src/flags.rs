//! Rule-based feature flags for gradual rollout
//!
//! Flags are cached locally with a TTL-bound refresh from the shared
//! counter store; admin mutations write through to the store so other
//! instances pick up the change within the cache TTL (eventual, not
//! immediate, consistency). Rules are an explicit ordered sequence: they
//! are OR-combined with early return, so reordering rules can change the
//! outcome and the order must be preserved end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::FlagsConfig;
use crate::store::CounterStore;
use crate::{Error, Result};

const INDEX_KEY: &str = "flags:index";

/// One rollout rule. Evaluated in list order; the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlagRule {
    /// Matches iff `value` is true
    Boolean {
        /// The literal decision
        value: bool,
    },
    /// Deterministic percentage rollout: matches iff the caller's bucket is
    /// below `percentage`
    Percentage {
        /// Enabled share, 0-100
        percentage: u8,
    },
    /// Matches iff the caller's email is in the list
    UserList {
        /// Exact member emails
        emails: Vec<String>,
    },
    /// Matches iff the deployment environment is in the list
    Environment {
        /// Environment names (e.g. `staging`, `production`)
        environments: Vec<String>,
    },
    /// Matches iff `start <= now <= end`
    TimeWindow {
        /// Window start (inclusive)
        start: DateTime<Utc>,
        /// Window end (inclusive)
        end: DateTime<Utc>,
    },
}

/// A named feature flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name
    pub name: String,
    /// Master switch; false short-circuits every rule
    pub enabled: bool,
    /// Decision when no rule matches (or none are configured)
    pub default_value: bool,
    /// Ordered rules
    pub rules: Vec<FlagRule>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Mutable flag fields accepted by the admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    /// Master switch
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Decision when no rule matches
    #[serde(default)]
    pub default_value: bool,
    /// Ordered rules
    #[serde(default)]
    pub rules: Vec<FlagRule>,
}

fn default_enabled() -> bool {
    true
}

/// Request context a flag decision is made against
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Stable caller id (drives percentage bucketing)
    pub user_id: Option<&'a str>,
    /// Caller email (drives `UserList` rules)
    pub email: Option<&'a str>,
}

struct CachedFlag {
    flag: FeatureFlag,
    fetched_at: Instant,
}

/// TTL-cached flag engine backed by the counter store.
pub struct FeatureFlagEngine {
    store: Arc<dyn CounterStore>,
    cache: DashMap<String, CachedFlag>,
    cache_ttl: Duration,
    persist_ttl: Duration,
    environment: String,
}

impl FeatureFlagEngine {
    /// Create an engine for one deployment environment.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, config: &FlagsConfig, environment: &str) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            cache_ttl: config.cache_ttl,
            persist_ttl: config.persist_ttl,
            environment: environment.to_string(),
        }
    }

    /// Seed flags from the static bootstrap list; existing flags win.
    pub async fn bootstrap(&self, config: &FlagsConfig) -> Result<()> {
        for seed in &config.bootstrap {
            if self.get_flag(&seed.name).await?.is_some() {
                continue;
            }
            self.create_flag(
                &seed.name,
                FlagDefinition {
                    enabled: seed.enabled,
                    default_value: seed.default_value,
                    rules: seed.rules.clone(),
                },
            )
            .await?;
            info!(flag = %seed.name, "Bootstrapped feature flag");
        }
        Ok(())
    }

    /// Evaluate a flag for a request.
    ///
    /// Unknown flags are disabled. Store errors fall back to the local
    /// cache (even stale) so an unavailable store degrades to per-instance
    /// decisions instead of failing requests.
    pub async fn is_enabled(&self, name: &str, ctx: EvalContext<'_>) -> bool {
        let flag = match self.get_flag(name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(flag = %name, error = %e, "Flag refresh failed, using local copy");
                self.cache.get(name).map(|c| c.flag.clone())
            }
        };

        flag.is_some_and(|flag| evaluate(&flag, ctx, &self.environment, Utc::now()))
    }

    /// Fetch a flag, refreshing the local cache from the store when stale.
    pub async fn get_flag(&self, name: &str) -> Result<Option<FeatureFlag>> {
        if let Some(cached) = self.cache.get(name) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(Some(cached.flag.clone()));
            }
        }

        match self.store.get(&flag_key(name)).await? {
            Some(raw) => {
                let flag: FeatureFlag = serde_json::from_str(&raw)?;
                self.cache_insert(flag.clone());
                Ok(Some(flag))
            }
            None => {
                // A stale local copy survives a store flush: re-publish it
                // rather than silently dropping the flag.
                if let Some(cached) = self.cache.get(name) {
                    let flag = cached.flag.clone();
                    drop(cached);
                    self.persist(&flag).await?;
                    self.cache_insert(flag.clone());
                    return Ok(Some(flag));
                }
                Ok(None)
            }
        }
    }

    /// Create a flag. Fails if the name is already taken.
    pub async fn create_flag(&self, name: &str, def: FlagDefinition) -> Result<FeatureFlag> {
        if self.get_flag(name).await?.is_some() {
            return Err(Error::Config(format!("flag already exists: {name}")));
        }

        let now = Utc::now();
        let flag = FeatureFlag {
            name: name.to_string(),
            enabled: def.enabled,
            default_value: def.default_value,
            rules: def.rules,
            created_at: now,
            updated_at: now,
        };

        self.persist(&flag).await?;
        self.index_add(name).await?;
        self.cache_insert(flag.clone());
        info!(flag = %name, "Created feature flag");
        Ok(flag)
    }

    /// Update an existing flag, preserving its creation timestamp.
    pub async fn update_flag(&self, name: &str, def: FlagDefinition) -> Result<FeatureFlag> {
        let existing = self
            .get_flag(name)
            .await?
            .ok_or_else(|| Error::FeatureUnavailable(name.to_string()))?;

        let flag = FeatureFlag {
            name: existing.name,
            enabled: def.enabled,
            default_value: def.default_value,
            rules: def.rules,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        self.persist(&flag).await?;
        self.cache_insert(flag.clone());
        info!(flag = %name, "Updated feature flag");
        Ok(flag)
    }

    /// Delete a flag from the cache, the store, and the index.
    pub async fn delete_flag(&self, name: &str) -> Result<()> {
        self.cache.remove(name);
        self.store.delete(&flag_key(name)).await?;
        self.index_remove(name).await?;
        info!(flag = %name, "Deleted feature flag");
        Ok(())
    }

    /// List all known flags.
    pub async fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
        let mut flags = Vec::new();
        for name in self.index().await? {
            if let Some(flag) = self.get_flag(&name).await? {
                flags.push(flag);
            }
        }
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(flags)
    }

    async fn persist(&self, flag: &FeatureFlag) -> Result<()> {
        let raw = serde_json::to_string(flag)?;
        self.store
            .set_with_expiry(&flag_key(&flag.name), &raw, self.persist_ttl)
            .await
    }

    fn cache_insert(&self, flag: FeatureFlag) {
        self.cache.insert(
            flag.name.clone(),
            CachedFlag {
                flag,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn index(&self) -> Result<Vec<String>> {
        match self.store.get(INDEX_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn index_add(&self, name: &str) -> Result<()> {
        let mut names = self.index().await?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            self.write_index(&names).await?;
        }
        Ok(())
    }

    async fn index_remove(&self, name: &str) -> Result<()> {
        let mut names = self.index().await?;
        names.retain(|n| n != name);
        self.write_index(&names).await
    }

    async fn write_index(&self, names: &[String]) -> Result<()> {
        let raw = serde_json::to_string(names)?;
        self.store
            .set_with_expiry(INDEX_KEY, &raw, self.persist_ttl)
            .await
    }
}

fn flag_key(name: &str) -> String {
    format!("flag:{name}")
}

/// Evaluate a flag against a request context.
///
/// A disabled flag is always false. With no rules the default applies.
/// Otherwise rules run in order and the first match returns true; when none
/// match, the default applies.
fn evaluate(flag: &FeatureFlag, ctx: EvalContext<'_>, environment: &str, now: DateTime<Utc>) -> bool {
    if !flag.enabled {
        return false;
    }
    if flag.rules.is_empty() {
        return flag.default_value;
    }

    for rule in &flag.rules {
        let matched = match rule {
            FlagRule::Boolean { value } => *value,
            FlagRule::Percentage { percentage } => ctx
                .user_id
                .is_some_and(|user| percentage_bucket(&flag.name, user) < *percentage),
            FlagRule::UserList { emails } => ctx
                .email
                .is_some_and(|email| emails.iter().any(|e| e == email)),
            FlagRule::Environment { environments } => {
                environments.iter().any(|e| e == environment)
            }
            FlagRule::TimeWindow { start, end } => *start <= now && now <= *end,
        };
        if matched {
            debug!(flag = %flag.name, rule = ?rule, "Flag rule matched");
            return true;
        }
    }

    flag.default_value
}

/// Deterministic 0-99 bucket for a `(flag, user)` pair.
///
/// The same user always lands in the same bucket for a given flag as long
/// as the user id is stable, and different flags bucket independently.
#[must_use]
pub fn percentage_bucket(flag_name: &str, user_id: &str) -> u8 {
    let digest = Sha256::digest(format!("{flag_name}:{user_id}").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}
