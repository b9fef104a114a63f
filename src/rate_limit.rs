//! Per-client, per-route admission control
//!
//! Counters live in the shared counter store so the decision is consistent
//! across service instances. Windows are fixed, not sliding: a counter for
//! window `w` is keyed by `(client, route, w, bucket_start)` with TTL equal
//! to the window length, so a burst straddling a boundary can momentarily
//! reach 2x the nominal rate. That is the accepted trade-off for O(1)
//! counter operations.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics;
use crate::store::CounterStore;
use crate::{Error, Result};

/// Seconds per window, in check order
const WINDOWS: [(&str, u64); 2] = [("m", 60), ("h", 3600)];
const DAY_WINDOW: (&str, u64) = ("d", 86_400);

/// Admission rule for one route prefix. Registered once at startup,
/// immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Route prefix the rule applies to (longest prefix wins)
    pub route: String,
    /// Ceiling for the 60 s window
    pub per_minute: u32,
    /// Ceiling for the 3600 s window
    pub per_hour: u32,
    /// Optional ceiling for the 86400 s window
    #[serde(default)]
    pub per_day: Option<u32>,
}

/// Outcome of a rate limit check, window counters included
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    /// False if any window is exceeded
    pub allowed: bool,
    /// Requests seen in the current minute bucket
    pub minute_count: u64,
    /// Requests seen in the current hour bucket
    pub hour_count: u64,
    /// Requests seen in the current day bucket, when configured
    pub day_count: Option<u64>,
    /// Seconds until the smallest exceeded window rolls over
    pub retry_after_secs: u64,
}

/// Store-backed fixed-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    rules: RwLock<Vec<RateLimitRule>>,
    enabled: bool,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, enabled: bool) -> Self {
        Self {
            store,
            rules: RwLock::new(Vec::new()),
            enabled,
        }
    }

    /// Register a rule. Called once per protected route at startup.
    pub fn register(&self, rule: RateLimitRule) {
        debug!(
            route = %rule.route,
            per_minute = rule.per_minute,
            per_hour = rule.per_hour,
            per_day = ?rule.per_day,
            "Registered rate limit"
        );
        self.rules.write().push(rule);
    }

    /// Find the most specific rule for a request path.
    #[must_use]
    pub fn rule_for(&self, path: &str) -> Option<RateLimitRule> {
        self.rules
            .read()
            .iter()
            .filter(|r| path.starts_with(r.route.as_str()))
            .max_by_key(|r| r.route.len())
            .cloned()
    }

    /// Check and count one request from `client` against `route`.
    ///
    /// All configured windows are incremented in a single pipelined
    /// round-trip, then each count is compared to its ceiling. Counting
    /// before comparing means rejected requests still consume budget, which
    /// keeps the increments atomic and the windows monotonic.
    pub async fn check(&self, client: &str, route: &str) -> Result<RateLimitDecision> {
        let Some(rule) = (if self.enabled { self.rule_for(route) } else { None }) else {
            return Ok(RateLimitDecision {
                allowed: true,
                minute_count: 0,
                hour_count: 0,
                day_count: None,
                retry_after_secs: 0,
            });
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut entries: Vec<(String, Duration)> = WINDOWS
            .iter()
            .map(|(tag, len)| (bucket_key(client, &rule.route, tag, *len, now), Duration::from_secs(*len)))
            .collect();
        if rule.per_day.is_some() {
            let (tag, len) = DAY_WINDOW;
            entries.push((
                bucket_key(client, &rule.route, tag, len, now),
                Duration::from_secs(len),
            ));
        }

        let counts = self.store.incr_many_with_expiry(&entries).await?;

        let minute_count = counts.first().copied().unwrap_or(0);
        let hour_count = counts.get(1).copied().unwrap_or(0);
        let day_count = rule.per_day.map(|_| counts.get(2).copied().unwrap_or(0));

        let mut exceeded: Option<u64> = None;
        if minute_count > u64::from(rule.per_minute) {
            exceeded = Some(WINDOWS[0].1);
        } else if hour_count > u64::from(rule.per_hour) {
            exceeded = Some(WINDOWS[1].1);
        } else if let (Some(limit), Some(count)) = (rule.per_day, day_count) {
            if count > u64::from(limit) {
                exceeded = Some(DAY_WINDOW.1);
            }
        }

        let allowed = exceeded.is_none();
        let retry_after_secs = exceeded.map_or(0, |len| len - (now % len));

        if !allowed {
            warn!(
                client = %client,
                route = %rule.route,
                minute = minute_count,
                hour = hour_count,
                "Rate limit exceeded"
            );
            metrics::rate_limit_rejection(&rule.route);
        }

        Ok(RateLimitDecision {
            allowed,
            minute_count,
            hour_count,
            day_count,
            retry_after_secs,
        })
    }
}

impl RateLimitDecision {
    /// Convert a rejection into the wire error for `route`.
    #[must_use]
    pub fn into_error(self, route: &str) -> Error {
        Error::RateLimitExceeded {
            route: route.to_string(),
            minute: self.minute_count,
            hour: self.hour_count,
            day: self.day_count,
            retry_after_secs: self.retry_after_secs,
        }
    }
}

/// Counter key for one `(client, route, window, bucket)` combination.
fn bucket_key(client: &str, route: &str, tag: &str, window_len: u64, now: u64) -> String {
    let bucket_start = now - (now % window_len);
    format!("rl:{client}:{route}:{tag}:{bucket_start}")
}
