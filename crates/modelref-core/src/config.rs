//! Centralized configuration for the registry core.
//!
//! Settings structs are plain data with `Default` impls and builder-style
//! `with_*` methods; constants that never vary per deployment live on the
//! `RegistryConfig` namespace struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed registry-level configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Default TTL for backend category caches.
    pub const CACHE_TTL: Duration = Duration::from_secs(60);
    /// Per-request timeout against the PRIMARY API.
    pub const PRIMARY_API_TIMEOUT: Duration = Duration::from_secs(10);
    /// Per-request timeout against the Horde API.
    pub const HORDE_API_TIMEOUT: Duration = Duration::from_secs(15);
    /// Max attempts for PRIMARY API fetches.
    pub const PRIMARY_RETRY_MAX_ATTEMPTS: u32 = 3;
    /// Base backoff between PRIMARY API retries.
    pub const PRIMARY_RETRY_BACKOFF: Duration = Duration::from_secs(1);
    /// Max attempts when downloading a legacy reference file from GitHub.
    pub const GITHUB_RETRY_MAX_ATTEMPTS: u32 = 3;
    /// Base backoff between GitHub download retries.
    pub const GITHUB_RETRY_BACKOFF: Duration = Duration::from_secs(2);
    /// Directory holding canonical v2 documents, under the base path.
    pub const V2_DIR_NAME: &'static str = "v2";
    /// Directory holding legacy documents, under the base path.
    pub const LEGACY_DIR_NAME: &'static str = "legacy";
    /// Directory holding category metadata sidecars, under the base path.
    pub const META_DIR_NAME: &'static str = "meta";
}

/// Connection and caching settings for the Redis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL.
    pub url: String,
    /// Socket read/write timeout.
    pub socket_timeout: Duration,
    /// Socket connect timeout.
    pub socket_connect_timeout: Duration,
    /// Maximum number of retry attempts for failed Redis operations.
    pub retry_max_attempts: u32,
    /// Backoff between retry attempts for Redis operations.
    pub retry_backoff: Duration,
    /// Prefix for all keys written by this deployment.
    pub key_prefix: String,
    /// TTL for cached entries. None falls back to the caller-supplied TTL.
    pub ttl: Option<Duration>,
    /// Whether to broadcast invalidations over pub/sub.
    pub use_pubsub: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            socket_timeout: Duration::from_secs(5),
            socket_connect_timeout: Duration::from_secs(5),
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            key_prefix: "modelref".to_string(),
            ttl: None,
            use_pubsub: true,
        }
    }
}

impl RedisSettings {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_pubsub(mut self, use_pubsub: bool) -> Self {
        self.use_pubsub = use_pubsub;
        self
    }
}

/// Location of the GitHub mirror holding legacy reference files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubRepoSettings {
    /// Raw-content base URL, e.g.
    /// "https://raw.githubusercontent.com/Haidra-Org/AI-Horde-image-model-reference".
    pub base_url: String,
    /// Branch to read from.
    pub branch: String,
}

impl Default for GithubRepoSettings {
    fn default() -> Self {
        Self {
            base_url: "https://raw.githubusercontent.com/Haidra-Org/AI-Horde-image-model-reference"
                .to_string(),
            branch: "main".to_string(),
        }
    }
}

impl GithubRepoSettings {
    /// Compose the raw-content URL for a file on the configured branch.
    pub fn compose_full_file_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.branch,
            filename
        )
    }
}

/// Thresholds and allowlists for the deletion-risk analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Hosts a model is expected to be served from. A model with valid
    /// download URLs but none on a preferred host is flagged.
    pub preferred_file_hosts: Vec<String>,
    /// Percentage of the category's monthly usage below which a model is
    /// flagged as low usage.
    pub low_usage_threshold_percent: f64,
    /// Freshness TTL for cached audit responses.
    pub audit_cache_ttl: Duration,
    /// Upper bound on serving a stale audit response while a refresh is
    /// pending. Must be >= `audit_cache_ttl`.
    pub audit_cache_stale_ttl: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            preferred_file_hosts: vec!["huggingface.co".to_string()],
            low_usage_threshold_percent: 0.1,
            audit_cache_ttl: Duration::from_secs(300),
            audit_cache_stale_ttl: Duration::from_secs(1800),
        }
    }
}

/// Background cache hydration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydratorSettings {
    /// Master switch; `start()` is a no-op when disabled.
    pub enabled: bool,
    /// Interval between hydration passes.
    pub interval: Duration,
    /// Delay before the first pass, letting the service finish startup.
    pub startup_delay: Duration,
    /// How long `stop()` waits for a graceful exit before aborting.
    pub shutdown_timeout: Duration,
}

impl Default for HydratorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(240),
            startup_delay: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
