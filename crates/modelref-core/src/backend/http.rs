//! HTTP backend for REPLICA mode.
//!
//! Fetches category data from a PRIMARY server's API with bounded
//! exponential-backoff retries, falling back to a wrapped GitHub backend
//! when the PRIMARY is unavailable. A 404 from the PRIMARY is definitive:
//! no retries and no fallback.

use crate::backend::replica::ReplicaCache;
use crate::backend::{GitHubBackend, InvalidationCallback, InvalidationHub, ModelReferenceBackend};
use crate::config::RegistryConfig;
use crate::models::{Category, ReplicateMode};
use crate::{ModelRefError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimal transport over the PRIMARY API, injectable for tests.
///
/// Implementations map an HTTP exchange to `(status, parsed body)`; network
/// failures (timeouts, refused connections) surface as errors.
#[async_trait]
pub trait PrimaryTransport: Send + Sync {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<(u16, Option<Value>)>;
}

struct ReqwestTransport {
    client: reqwest::Client,
}

#[async_trait]
impl PrimaryTransport for ReqwestTransport {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<(u16, Option<Value>)> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(ModelRefError::from)?;
        let status = response.status().as_u16();
        if status == 200 {
            let body: Value = response.json().await.map_err(ModelRefError::from)?;
            Ok((status, Some(body)))
        } else {
            Ok((status, None))
        }
    }
}

/// Snapshot of backend counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendStatistics {
    /// Count of successful PRIMARY fetches.
    pub primary_hits: u64,
    /// Count of times the GitHub fallback was invoked.
    pub github_fallbacks: u64,
    /// Number of categories in the local cache.
    pub cache_size: usize,
}

enum PrimaryFetch {
    Data(Value),
    /// HTTP 404: confirmed absent, not a transient condition.
    NotFound,
    /// Retries exhausted or transport error on every attempt.
    Unavailable,
}

/// Backend that fetches from a PRIMARY API with GitHub fallback.
pub struct HttpBackend {
    primary_api_url: String,
    github: Arc<GitHubBackend>,
    cache: ReplicaCache,
    invalidation: InvalidationHub,
    transport: Arc<dyn PrimaryTransport>,
    timeout: Duration,
    retry_max_attempts: u32,
    retry_backoff: Duration,
    enable_github_fallback: bool,
    /// Serializes fetches so concurrent callers cannot race a TTL window.
    fetch_lock: tokio::sync::Mutex<()>,
    primary_hits: AtomicU64,
    github_fallbacks: AtomicU64,
}

impl HttpBackend {
    /// Create an HTTP backend targeting `primary_api_url`.
    ///
    /// The wrapped GitHub backend must be in REPLICA mode: a PRIMARY-mode
    /// GitHub backend is a seeding tool, not a fallback source.
    pub fn new(primary_api_url: impl Into<String>, github: Arc<GitHubBackend>) -> Result<Self> {
        if github.replicate_mode() != ReplicateMode::Replica {
            return Err(ModelRefError::Config {
                message: "HttpBackend requires a GitHubBackend in REPLICA mode as fallback"
                    .to_string(),
            });
        }

        let primary_api_url = primary_api_url.into().trim_end_matches('/').to_string();
        debug!("HttpBackend initialized with PRIMARY at {}", primary_api_url);

        Ok(Self {
            primary_api_url,
            github,
            cache: ReplicaCache::new(Some(RegistryConfig::CACHE_TTL)),
            invalidation: InvalidationHub::new(),
            transport: Arc::new(ReqwestTransport {
                client: reqwest::Client::new(),
            }),
            timeout: RegistryConfig::PRIMARY_API_TIMEOUT,
            retry_max_attempts: RegistryConfig::PRIMARY_RETRY_MAX_ATTEMPTS,
            retry_backoff: RegistryConfig::PRIMARY_RETRY_BACKOFF,
            enable_github_fallback: true,
            fetch_lock: tokio::sync::Mutex::new(()),
            primary_hits: AtomicU64::new(0),
            github_fallbacks: AtomicU64::new(0),
        })
    }

    /// Replace the transport (tests use a scripted one).
    pub fn with_transport(mut self, transport: Arc<dyn PrimaryTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Override the retry policy against the PRIMARY.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Override the category cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ReplicaCache::new(Some(ttl));
        self
    }

    /// Enable or disable the GitHub fallback.
    pub fn with_github_fallback(mut self, enabled: bool) -> Self {
        self.enable_github_fallback = enabled;
        self
    }

    fn category_api_url(&self, category: Category) -> String {
        format!("{}/model_references/v2/{}", self.primary_api_url, category)
    }

    fn legacy_api_url(&self, category: Category) -> String {
        format!("{}/model_references/legacy/{}", self.primary_api_url, category)
    }

    async fn fetch_from_primary(&self, category: Category, url: &str) -> PrimaryFetch {
        for attempt in 0..self.retry_max_attempts {
            if attempt > 0 {
                let wait = self.retry_backoff * 2u32.pow(attempt - 1);
                debug!(
                    "Retrying PRIMARY API for {} in {:?} (attempt {})",
                    category,
                    wait,
                    attempt + 1
                );
                tokio::time::sleep(wait).await;
            }

            match self.transport.get_json(url, self.timeout).await {
                Ok((200, Some(body))) => {
                    info!("Fetched {} from PRIMARY API", category);
                    self.primary_hits.fetch_add(1, Ordering::Relaxed);
                    return PrimaryFetch::Data(body);
                }
                Ok((404, _)) => {
                    debug!("PRIMARY API returned 404 for {}", category);
                    return PrimaryFetch::NotFound;
                }
                Ok((status, _)) => {
                    warn!("PRIMARY API returned {} for {}", status, category);
                }
                Err(e) => {
                    warn!("PRIMARY API error for {}: {}", category, e);
                }
            }
        }

        warn!(
            "Failed to fetch {} from PRIMARY after {} attempts",
            category, self.retry_max_attempts
        );
        PrimaryFetch::Unavailable
    }
}

#[async_trait]
impl ModelReferenceBackend for HttpBackend {
    fn backend_name(&self) -> &'static str {
        "HttpBackend"
    }

    fn replicate_mode(&self) -> ReplicateMode {
        ReplicateMode::Replica
    }

    async fn fetch_category(
        &self,
        category: Category,
        force_refresh: bool,
    ) -> Result<Option<Value>> {
        let _guard = self.fetch_lock.lock().await;

        if !force_refresh {
            if let Some(cached) = self.cache.get(category, None) {
                debug!("Local cache hit for {}", category);
                return Ok(Some(cached));
            }
        }

        let url = self.category_api_url(category);
        let data = match self.fetch_from_primary(category, &url).await {
            PrimaryFetch::Data(body) => Some(body),
            // Confirmed absent on the PRIMARY: the fallback is not
            // consulted, so a deliberately removed model cannot resurface
            // from stale GitHub data.
            PrimaryFetch::NotFound => None,
            PrimaryFetch::Unavailable if self.enable_github_fallback => {
                info!("Falling back to GitHub for {}", category);
                self.github_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.github
                    .fetch_category(category, force_refresh)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("GitHub fallback failed for {}: {}", category, e);
                        None
                    })
            }
            PrimaryFetch::Unavailable => None,
        };

        if data.is_some() {
            self.cache.store(category, data.clone(), None);
        }

        Ok(data)
    }

    async fn fetch_all_categories(&self, force_refresh: bool) -> HashMap<Category, Option<Value>> {
        let fetches = Category::ALL.map(|category| async move {
            let data = self
                .fetch_category(category, force_refresh)
                .await
                .unwrap_or_else(|e| {
                    warn!("Fetch failed for {}: {}", category, e);
                    None
                });
            (category, data)
        });

        join_all(fetches).await.into_iter().collect()
    }

    fn needs_refresh(&self, category: Category) -> bool {
        self.cache.needs_refresh(category, None)
    }

    fn mark_stale(&self, category: Category) {
        debug!("Marking {} as stale", category);
        self.cache.mark_stale(category);
        self.cache.mark_legacy_stale(category);
        self.invalidation.notify(category);
    }

    fn register_invalidation_callback(&self, callback: InvalidationCallback) {
        self.invalidation.register(callback);
    }

    async fn get_legacy_json(
        &self,
        category: Category,
        redownload: bool,
    ) -> Result<Option<Value>> {
        let _guard = self.fetch_lock.lock().await;

        // The legacy cache is independent of the typed one: a v2 hit never
        // satisfies a legacy request, nor the reverse.
        if !redownload {
            let (cached, _) = self.cache.get_legacy(category, None);
            if cached.is_some() {
                return Ok(cached);
            }
        }

        let url = self.legacy_api_url(category);
        let data = match self.fetch_from_primary(category, &url).await {
            PrimaryFetch::Data(body) => Some(body),
            PrimaryFetch::NotFound => None,
            PrimaryFetch::Unavailable if self.enable_github_fallback => {
                self.github_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.github
                    .get_legacy_json(category, redownload)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("GitHub legacy fallback failed for {}: {}", category, e);
                        None
                    })
            }
            PrimaryFetch::Unavailable => None,
        };

        if let Some(ref value) = data {
            let string = serde_json::to_string(value).ok();
            self.cache.store_legacy(category, data.clone(), string, None);
        }

        Ok(data)
    }

    async fn get_legacy_json_string(
        &self,
        category: Category,
        redownload: bool,
    ) -> Result<Option<String>> {
        if !redownload {
            let (_, cached) = self.cache.get_legacy(category, None);
            if cached.is_some() {
                return Ok(cached);
            }
        }

        self.get_legacy_json(category, redownload).await?;
        let (_, string) = self.cache.get_legacy(category, None);
        Ok(string)
    }

    fn supports_statistics(&self) -> bool {
        true
    }

    fn get_statistics(&self) -> Result<Value> {
        let stats = HttpBackendStatistics {
            primary_hits: self.primary_hits.load(Ordering::Relaxed),
            github_fallbacks: self.github_fallbacks.load(Ordering::Relaxed),
            cache_size: self.cache.cache_size(),
        };
        Ok(serde_json::to_value(stats)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubRepoSettings;
    use crate::network::RetryConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Transport that replays a scripted response for every call and
    /// counts how many times it was asked.
    struct ScriptedTransport {
        calls: AtomicUsize,
        response: Box<dyn Fn() -> Result<(u16, Option<Value>)> + Send + Sync>,
    }

    impl ScriptedTransport {
        fn status(status: u16, body: Option<Value>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Box::new(move || Ok((status, body.clone()))),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Box::new(|| {
                    Err(ModelRefError::Network {
                        message: "connection refused".to_string(),
                        cause: None,
                    })
                }),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PrimaryTransport for ScriptedTransport {
        async fn get_json(&self, _url: &str, _timeout: Duration) -> Result<(u16, Option<Value>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    fn replica_github(temp_dir: &TempDir) -> Arc<GitHubBackend> {
        // Unreachable host: the GitHub backend serves only its mirror dir
        let repo = GithubRepoSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            branch: "main".to_string(),
        };
        Arc::new(
            GitHubBackend::new(repo, temp_dir.path(), ReplicateMode::Replica).with_retry(
                RetryConfig::new()
                    .with_max_attempts(1)
                    .with_base_delay(Duration::from_millis(1)),
            ),
        )
    }

    fn backend_with(transport: Arc<ScriptedTransport>, github: Arc<GitHubBackend>) -> HttpBackend {
        HttpBackend::new("http://primary.test/api", github)
            .unwrap()
            .with_transport(transport)
            .with_retry(3, Duration::from_millis(1))
    }

    #[test]
    fn test_primary_mode_github_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let repo = GithubRepoSettings::default();
        let github = Arc::new(GitHubBackend::new(repo, temp_dir.path(), ReplicateMode::Primary));
        let result = HttpBackend::new("http://primary.test/api", github);
        assert!(matches!(result, Err(ModelRefError::Config { .. })));
    }

    #[tokio::test]
    async fn test_at_most_one_fetch_per_ttl_window() {
        let temp_dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::status(200, Some(json!({"Deliberate": {}})));
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        for _ in 0..5 {
            let data = backend
                .fetch_category(Category::ImageGeneration, false)
                .await
                .unwrap();
            assert!(data.is_some());
        }

        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let temp_dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::status(200, Some(json!({})));
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        backend
            .fetch_category(Category::Clip, false)
            .await
            .unwrap();
        backend.fetch_category(Category::Clip, true).await.unwrap();

        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_404_short_circuits_retries_and_fallback() {
        let temp_dir = TempDir::new().unwrap();
        // The GitHub mirror HAS data for this category; a fallback would
        // succeed, which is exactly what must not happen on a 404.
        std::fs::write(
            temp_dir.path().join("clip.json"),
            r#"{"ViT-L/14": {"name": "ViT-L/14", "config": {}}}"#,
        )
        .unwrap();

        let transport = ScriptedTransport::status(404, None);
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        let data = backend.fetch_category(Category::Clip, false).await.unwrap();
        assert!(data.is_none());
        // Exactly one network call: no retries
        assert_eq!(transport.call_count(), 1);

        let stats: HttpBackendStatistics =
            serde_json::from_value(backend.get_statistics().unwrap()).unwrap();
        assert_eq!(stats.github_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_server_error_retries_then_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("clip.json"),
            r#"{"ViT-L/14": {"name": "ViT-L/14", "config": {}}}"#,
        )
        .unwrap();

        let transport = ScriptedTransport::status(500, None);
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        let data = backend
            .fetch_category(Category::Clip, false)
            .await
            .unwrap()
            .unwrap();
        assert!(data.get("ViT-L/14").is_some());

        // All attempts were spent on the PRIMARY before falling back once
        assert_eq!(transport.call_count(), 3);
        let stats: HttpBackendStatistics =
            serde_json::from_value(backend.get_statistics().unwrap()).unwrap();
        assert_eq!(stats.github_fallbacks, 1);
        assert_eq!(stats.primary_hits, 0);
    }

    #[tokio::test]
    async fn test_fallback_disabled_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("clip.json"),
            r#"{"ViT-L/14": {"name": "ViT-L/14", "config": {}}}"#,
        )
        .unwrap();

        let transport = ScriptedTransport::failing();
        let backend = backend_with(transport.clone(), replica_github(&temp_dir))
            .with_github_fallback(false);

        let data = backend.fetch_category(Category::Clip, false).await.unwrap();
        assert!(data.is_none());
        assert_eq!(transport.call_count(), 3);

        let stats: HttpBackendStatistics =
            serde_json::from_value(backend.get_statistics().unwrap()).unwrap();
        assert_eq!(stats.github_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_legacy_cache_is_independent_of_typed_cache() {
        let temp_dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::status(200, Some(json!({"Deliberate": {}})));
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        backend
            .fetch_category(Category::ImageGeneration, false)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);

        // The typed hit must not satisfy the legacy path
        backend
            .get_legacy_json(Category::ImageGeneration, false)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_category_refetches() {
        let temp_dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::status(200, Some(json!({})));
        let backend = backend_with(transport.clone(), replica_github(&temp_dir));

        backend.fetch_category(Category::Blip, false).await.unwrap();
        backend.mark_stale(Category::Blip);
        assert!(backend.needs_refresh(Category::Blip));

        backend.fetch_category(Category::Blip, false).await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }
}
