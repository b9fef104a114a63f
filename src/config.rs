//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::flags::FlagRule;
use crate::rate_limit::RateLimitRule;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Service identity
    pub service: ServiceConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Shared counter store configuration
    pub store: StoreConfig,
    /// Resilience configuration (breaker, retry, timeout, concurrency)
    pub resilience: ResilienceConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitSection,
    /// Feature flag configuration
    pub flags: FlagsConfig,
    /// Security filter configuration
    pub security: SecurityConfig,
}

/// Service identity, stamped into health reports and log context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name as reported by `/health`
    pub name: String,
    /// Deployment environment (matched by `Environment` flag rules)
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "fleetguard".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Shared counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend
    pub backend: StoreBackend,
    /// Connection URL (redis backend)
    pub url: String,
    /// Prefix applied to every key, so fleets can share one store
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379/".to_string(),
            key_prefix: "fg:".to_string(),
        }
    }
}

/// Counter store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis (shared across instances)
    #[default]
    Redis,
    /// In-process memory (single instance; rate limits and flags are
    /// per-instance only)
    Memory,
}

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ResilienceConfig {
    /// Circuit breaker defaults
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry defaults
    pub retry: RetryConfig,
    /// Timeout defaults
    pub timeout: TimeoutConfig,
    /// Concurrency gate defaults
    pub concurrency: ConcurrencyConfig,
    /// Per-dependency overrides, keyed `service/operation`
    #[serde(default)]
    pub dependencies: HashMap<String, DependencyOverrides>,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking
    pub enabled: bool,
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time the circuit stays open before admitting a half-open probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum retries after the initial attempt
    pub max_retries: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt deadline for a protected call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Concurrency gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneous in-flight calls per dependency
    pub max_concurrent: usize,
    /// Behavior at capacity
    pub mode: GateMode,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            mode: GateMode::Wait,
        }
    }
}

/// Behavior of a concurrency gate at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Suspend the caller until a permit frees up (backpressure)
    #[default]
    Wait,
    /// Fail fast with `concurrency_limit`
    Reject,
}

/// Per-dependency overrides of the resilience defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DependencyOverrides {
    /// Override failure threshold
    pub failure_threshold: Option<u32>,
    /// Override cooldown
    #[serde(with = "humantime_serde::option")]
    pub cooldown: Option<Duration>,
    /// Override max retries
    pub max_retries: Option<u32>,
    /// Override per-attempt timeout
    #[serde(with = "humantime_serde::option")]
    pub call_timeout: Option<Duration>,
    /// Override max concurrent calls
    pub max_concurrent: Option<usize>,
    /// Override gate mode
    pub mode: Option<GateMode>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Enable rate limiting
    pub enabled: bool,
    /// Rules registered at startup, one per protected route prefix
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

/// Feature flag configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Local cache TTL; other instances see mutations within this bound
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// TTL for flag state written to the counter store
    #[serde(with = "humantime_serde")]
    pub persist_ttl: Duration,
    /// Flags seeded at startup (created only if absent)
    #[serde(default)]
    pub bootstrap: Vec<FlagSeed>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            persist_ttl: Duration::from_secs(24 * 3600),
            bootstrap: Vec::new(),
        }
    }
}

/// A flag definition in the bootstrap list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSeed {
    /// Flag name
    pub name: String,
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Value when no rule matches
    #[serde(default)]
    pub default_value: bool,
    /// Ordered rules (order is significant, first match wins)
    #[serde(default)]
    pub rules: Vec<FlagRule>,
}

fn default_true() -> bool {
    true
}

/// Security filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable the request security filter
    pub enabled: bool,
    /// Allowed `Origin` values; `*.domain` matches any subdomain
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    pub allowed_methods: Vec<String>,
    /// Route prefixes serving interactive API docs (relaxed CSP)
    pub docs_paths: Vec<String>,
    /// Violations a client may trigger per window before 429s
    pub violation_budget: u64,
    /// Violation counting window
    #[serde(with = "humantime_serde")]
    pub violation_window: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: Vec::new(),
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "PATCH".to_string(),
                "DELETE".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
            docs_paths: vec!["/docs".to_string(), "/redoc".to_string()],
            violation_budget: 5,
            violation_window: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (FLEETGUARD_ prefix)
        figment = figment.merge(Env::prefixed("FLEETGUARD_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in store URL
        config.expand_env_vars();

        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        self.store.url = Self::expand_string(&re, &self.store.url);
        self.store.key_prefix = Self::expand_string(&re, &self.store.key_prefix);
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Reject configurations that cannot work at runtime.
    fn validate(&self) -> Result<()> {
        if self.resilience.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.resilience.concurrency.max_concurrent == 0 {
            return Err(Error::Config(
                "concurrency.max_concurrent must be at least 1".to_string(),
            ));
        }
        for rule in &self.rate_limit.rules {
            if rule.per_minute == 0 || rule.per_hour == 0 {
                return Err(Error::Config(format!(
                    "rate limit rule for {} must allow at least 1 request per window",
                    rule.route
                )));
            }
        }
        Ok(())
    }

}

impl ResilienceConfig {
    /// Resolved resilience settings for one dependency, with overrides applied.
    #[must_use]
    pub fn settings_for(&self, key: &str) -> DependencySettings {
        let overrides = self.dependencies.get(key);
        let r = self;

        DependencySettings {
            breaker_enabled: r.circuit_breaker.enabled,
            retry_enabled: r.retry.enabled,
            failure_threshold: overrides
                .and_then(|o| o.failure_threshold)
                .unwrap_or(r.circuit_breaker.failure_threshold),
            cooldown: overrides
                .and_then(|o| o.cooldown)
                .unwrap_or(r.circuit_breaker.cooldown),
            max_retries: overrides
                .and_then(|o| o.max_retries)
                .unwrap_or(r.retry.max_retries),
            call_timeout: overrides
                .and_then(|o| o.call_timeout)
                .unwrap_or(r.timeout.call_timeout),
            max_concurrent: overrides
                .and_then(|o| o.max_concurrent)
                .unwrap_or(r.concurrency.max_concurrent),
            mode: overrides
                .and_then(|o| o.mode)
                .unwrap_or(r.concurrency.mode),
        }
    }
}

/// Effective resilience settings for one dependency
#[derive(Debug, Clone, Copy)]
pub struct DependencySettings {
    /// Whether circuit breaking is enabled at all
    pub breaker_enabled: bool,
    /// Whether retries are enabled at all
    pub retry_enabled: bool,
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Open-state cooldown before a half-open probe
    pub cooldown: Duration,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Per-attempt deadline
    pub call_timeout: Duration,
    /// Gate capacity
    pub max_concurrent: usize,
    /// Gate behavior at capacity
    pub mode: GateMode,
}
