//! GitHub backend.
//!
//! Fetches legacy-format reference files from the GitHub mirror, converts
//! them to canonical v2 records, and keeps a local mirror copy so a
//! deployment that loses network access can keep serving the last known
//! data.

use crate::backend::legacy::convert_legacy_category;
use crate::backend::replica::ReplicaCache;
use crate::backend::{InvalidationCallback, InvalidationHub, ModelReferenceBackend};
use crate::config::{GithubRepoSettings, RegistryConfig};
use crate::models::{Category, ReplicateMode};
use crate::network::{retry_async, RetryConfig};
use crate::{ModelRefError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backend that sources model references from the GitHub mirror.
pub struct GitHubBackend {
    repo: GithubRepoSettings,
    mirror_dir: PathBuf,
    mode: ReplicateMode,
    cache: ReplicaCache,
    invalidation: InvalidationHub,
    client: reqwest::Client,
    retry: RetryConfig,
    timeout: Duration,
}

impl GitHubBackend {
    /// Create a GitHub backend.
    ///
    /// `mirror_dir` receives a copy of every downloaded legacy file and is
    /// read back when GitHub is unreachable.
    pub fn new(
        repo: GithubRepoSettings,
        mirror_dir: impl Into<PathBuf>,
        mode: ReplicateMode,
    ) -> Self {
        Self {
            repo,
            mirror_dir: mirror_dir.into(),
            mode,
            cache: ReplicaCache::new(Some(RegistryConfig::CACHE_TTL)),
            invalidation: InvalidationHub::new(),
            client: reqwest::Client::new(),
            retry: RetryConfig::new()
                .with_max_attempts(RegistryConfig::GITHUB_RETRY_MAX_ATTEMPTS)
                .with_base_delay(RegistryConfig::GITHUB_RETRY_BACKOFF)
                .with_jitter(true),
            timeout: RegistryConfig::HORDE_API_TIMEOUT,
        }
    }

    /// Override the retry policy for downloads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the category cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ReplicaCache::new(Some(ttl));
        self
    }

    /// Legacy file name on the mirror for a category.
    ///
    /// The image generation category keeps its historical file name.
    pub fn legacy_file_name(category: Category) -> String {
        match category {
            Category::ImageGeneration => "stable_diffusion.json".to_string(),
            other => format!("{}.json", other),
        }
    }

    fn mirror_path(&self, category: Category) -> PathBuf {
        self.mirror_dir.join(Self::legacy_file_name(category))
    }

    async fn download_legacy(&self, category: Category) -> Result<String> {
        let url = self.repo.compose_full_file_url(&Self::legacy_file_name(category));

        let (result, stats) = retry_async(
            &self.retry,
            || {
                let url = url.clone();
                async move {
                    let response = self
                        .client
                        .get(&url)
                        .timeout(self.timeout)
                        .send()
                        .await
                        .map_err(ModelRefError::from)?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(ModelRefError::GitHub {
                            message: format!("GitHub returned {} for {}", status, url),
                            status_code: Some(status.as_u16()),
                        });
                    }
                    response.text().await.map_err(ModelRefError::from)
                }
            },
            |e| e.is_retryable(),
        )
        .await;

        if stats.attempts > 1 {
            debug!("GitHub download for {} took {} attempts", category, stats.attempts);
        }
        result
    }

    fn read_mirror(&self, category: Category) -> Option<String> {
        let path = self.mirror_path(category);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                debug!("Serving {} from local mirror {}", category, path.display());
                Some(contents)
            }
            Err(_) => None,
        }
    }

    fn write_mirror(&self, category: Category, contents: &str) {
        let path = self.mirror_path(category);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, contents) {
            warn!("Failed to mirror {} to {}: {}", category, path.display(), e);
        }
    }

    /// Download (or fall back to the mirror), returning the raw legacy
    /// JSON string. None when neither source can provide data.
    async fn obtain_legacy_string(&self, category: Category) -> Option<String> {
        match self.download_legacy(category).await {
            Ok(contents) => {
                info!("Downloaded legacy {} from GitHub", category);
                self.write_mirror(category, &contents);
                Some(contents)
            }
            Err(e) => {
                warn!(
                    "GitHub download failed for {}, trying local mirror: {}",
                    category, e
                );
                self.read_mirror(category)
            }
        }
    }
}

#[async_trait]
impl ModelReferenceBackend for GitHubBackend {
    fn backend_name(&self) -> &'static str {
        "GitHubBackend"
    }

    fn replicate_mode(&self) -> ReplicateMode {
        self.mode
    }

    async fn fetch_category(
        &self,
        category: Category,
        force_refresh: bool,
    ) -> Result<Option<Value>> {
        if !force_refresh {
            if let Some(cached) = self.cache.get(category, None) {
                return Ok(Some(cached));
            }
        }

        let Some(legacy_string) = self.obtain_legacy_string(category).await else {
            self.cache.store(category, None, None);
            return Ok(None);
        };

        let legacy: Value = match serde_json::from_str(&legacy_string) {
            Ok(value) => value,
            Err(e) => {
                warn!("Legacy JSON for {} is malformed: {}", category, e);
                self.cache.store(category, None, None);
                return Ok(None);
            }
        };

        let converted = convert_legacy_category(&legacy);
        self.cache.store(category, Some(converted.clone()), None);
        self.cache
            .store_legacy(category, Some(legacy), Some(legacy_string), None);

        Ok(Some(converted))
    }

    fn needs_refresh(&self, category: Category) -> bool {
        self.cache.needs_refresh(category, None)
    }

    fn mark_stale(&self, category: Category) {
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
        if !redownload {
            let (cached, _) = self.cache.get_legacy(category, None);
            if cached.is_some() {
                return Ok(cached);
            }
        }

        let Some(legacy_string) = self.obtain_legacy_string(category).await else {
            return Ok(None);
        };
        let legacy: Value = serde_json::from_str(&legacy_string).map_err(|e| ModelRefError::Json {
            message: format!("Legacy JSON for {} is malformed: {}", category, e),
            source: Some(e),
        })?;

        self.cache
            .store_legacy(category, Some(legacy.clone()), Some(legacy_string), None);
        Ok(Some(legacy))
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
}
