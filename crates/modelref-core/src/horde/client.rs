//! Client for the external Horde API.
//!
//! Fetches model status, usage statistics and worker lists with per-call
//! timeouts and a small in-memory TTL cache, so repeated audit requests
//! within a window do not hammer the upstream service.

use crate::config::RegistryConfig;
use crate::horde::models::{HordeModelStatsResponse, HordeModelStatus, HordeModelType, HordeWorker};
use crate::Result;
use mini_moka::sync::Cache;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_HORDE_API_URL: &str = "https://aihorde.net/api";

/// Client for the Horde status/stats/workers endpoints.
pub struct HordeApiClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    status_cache: Cache<HordeModelType, Vec<HordeModelStatus>>,
    stats_cache: Cache<HordeModelType, HordeModelStatsResponse>,
    workers_cache: Cache<HordeModelType, Vec<HordeWorker>>,
}

impl HordeApiClient {
    /// Create a client against the public Horde API.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_HORDE_API_URL)
    }

    /// Create a client against a specific API base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_base_url_and_ttl(base_url, Duration::from_secs(60))
    }

    /// Create a client with an explicit response cache TTL.
    pub fn with_base_url_and_ttl(base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: RegistryConfig::HORDE_API_TIMEOUT,
            status_cache: Cache::builder().time_to_live(ttl).max_capacity(4).build(),
            stats_cache: Cache::builder().time_to_live(ttl).max_capacity(4).build(),
            workers_cache: Cache::builder().time_to_live(ttl).max_capacity(4).build(),
        }
    }

    /// Model status entries for one model type.
    pub async fn get_model_status(
        &self,
        model_type: HordeModelType,
        force_refresh: bool,
    ) -> Result<Vec<HordeModelStatus>> {
        if !force_refresh {
            if let Some(cached) = self.status_cache.get(&model_type) {
                debug!("Horde status cache hit for {:?}", model_type);
                return Ok(cached);
            }
        }

        let url = format!(
            "{}/v2/status/models?type={}",
            self.base_url,
            model_type.as_query_value()
        );
        let status: Vec<HordeModelStatus> = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(crate::ModelRefError::from)?
            .json()
            .await?;

        info!("Fetched {} model status entries from Horde", status.len());
        self.status_cache.insert(model_type, status.clone());
        Ok(status)
    }

    /// Per-window usage statistics for one model type.
    pub async fn get_model_stats(
        &self,
        model_type: HordeModelType,
        force_refresh: bool,
    ) -> Result<HordeModelStatsResponse> {
        if !force_refresh {
            if let Some(cached) = self.stats_cache.get(&model_type) {
                debug!("Horde stats cache hit for {:?}", model_type);
                return Ok(cached);
            }
        }

        let url = format!(
            "{}/v2/stats/{}/models",
            self.base_url,
            model_type.stats_path_segment()
        );
        let stats: HordeModelStatsResponse = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(crate::ModelRefError::from)?
            .json()
            .await?;

        self.stats_cache.insert(model_type, stats.clone());
        Ok(stats)
    }

    /// Workers of one type, with the models they serve.
    pub async fn get_workers(
        &self,
        model_type: HordeModelType,
        force_refresh: bool,
    ) -> Result<Vec<HordeWorker>> {
        if !force_refresh {
            if let Some(cached) = self.workers_cache.get(&model_type) {
                debug!("Horde workers cache hit for {:?}", model_type);
                return Ok(cached);
            }
        }

        let url = format!(
            "{}/v2/workers?type={}",
            self.base_url,
            model_type.as_query_value()
        );
        let workers: Vec<HordeWorker> = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(crate::ModelRefError::from)?
            .json()
            .await?;

        self.workers_cache.insert(model_type, workers.clone());
        Ok(workers)
    }

    /// Model status indexed by model name.
    pub async fn get_model_status_indexed(
        &self,
        model_type: HordeModelType,
        force_refresh: bool,
    ) -> Result<HashMap<String, HordeModelStatus>> {
        let status = self.get_model_status(model_type, force_refresh).await?;
        Ok(status.into_iter().map(|s| (s.name.clone(), s)).collect())
    }

    /// Drop all cached responses.
    pub fn invalidate_cache(&self) {
        self.status_cache.invalidate_all();
        self.stats_cache.invalidate_all();
        self.workers_cache.invalidate_all();
    }
}

impl Default for HordeApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HordeApiClient::with_base_url("https://aihorde.net/api/");
        assert_eq!(client.base_url, "https://aihorde.net/api");
    }
}
