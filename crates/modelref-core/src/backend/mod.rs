//! Pluggable storage backends for model reference data.
//!
//! The trait defines the contract all providers fulfill; concrete backends
//! are the filesystem (PRIMARY source of truth), GitHub and HTTP replicas,
//! and a Redis-backed distributed cache wrapping the filesystem.

mod filesystem;
mod github;
mod http;
mod legacy;
mod redis;
mod replica;

pub use filesystem::{FileSystemBackend, MetadataPopulationResult};
pub use github::GitHubBackend;
pub use http::{HttpBackend, HttpBackendStatistics, PrimaryTransport};
pub use legacy::convert_legacy_category;
pub use redis::RedisBackend;
pub use replica::ReplicaCache;

use crate::models::{Category, ReplicateMode};
use crate::{ModelRefError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Callback fired when a category's cached data is invalidated.
pub type InvalidationCallback = Box<dyn Fn(Category) + Send + Sync>;

/// Shared registry of invalidation callbacks.
///
/// Backends compose one of these; `mark_stale` implementations notify it
/// after updating their own staleness state so external layers (manager,
/// audit cache) can cascade evictions.
#[derive(Default)]
pub struct InvalidationHub {
    callbacks: Mutex<Vec<InvalidationCallback>>,
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: InvalidationCallback) {
        self.callbacks
            .lock()
            .expect("invalidation lock poisoned")
            .push(callback);
    }

    pub fn notify(&self, category: Category) {
        let callbacks = self.callbacks.lock().expect("invalidation lock poisoned");
        for callback in callbacks.iter() {
            callback(category);
        }
    }
}

/// Abstract contract for model reference data providers.
///
/// Backends fetch raw category documents (model name → attributes) from
/// their source and expose staleness bookkeeping. Write operations and
/// capability probes are optional; read-only backends keep the erroring
/// defaults.
#[async_trait]
pub trait ModelReferenceBackend: Send + Sync {
    /// Short name used in logs and error messages.
    fn backend_name(&self) -> &'static str;

    /// The replication mode of this backend instance.
    fn replicate_mode(&self) -> ReplicateMode;

    /// Fetch model reference data for one category.
    ///
    /// Returns `Ok(None)` when the category cannot be fetched; transient
    /// source failures degrade rather than propagate.
    async fn fetch_category(
        &self,
        category: Category,
        force_refresh: bool,
    ) -> Result<Option<Value>>;

    /// Fetch all categories. Categories that cannot be fetched map to None.
    async fn fetch_all_categories(&self, force_refresh: bool) -> HashMap<Category, Option<Value>> {
        let mut result = HashMap::new();
        for category in Category::ALL {
            let data = match self.fetch_category(category, force_refresh).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("{}: fetch failed for {}: {}", self.backend_name(), category, e);
                    None
                }
            };
            result.insert(category, data);
        }
        result
    }

    /// Whether existing cached data for a category has become stale.
    ///
    /// Returns false when nothing has been cached yet: a first fetch is not
    /// a "refresh".
    fn needs_refresh(&self, category: Category) -> bool;

    /// Mark a category stale and notify invalidation callbacks.
    fn mark_stale(&self, category: Category);

    /// Register a callback fired whenever a category is invalidated.
    fn register_invalidation_callback(&self, callback: InvalidationCallback);

    /// Raw legacy-format JSON for a category, without typed validation.
    async fn get_legacy_json(&self, category: Category, redownload: bool)
        -> Result<Option<Value>>;

    /// Raw legacy-format JSON string for a category.
    async fn get_legacy_json_string(
        &self,
        category: Category,
        redownload: bool,
    ) -> Result<Option<String>>;

    /// Whether this backend supports write operations.
    fn supports_writes(&self) -> bool {
        false
    }

    /// Whether this backend supports cache warming.
    fn supports_cache_warming(&self) -> bool {
        false
    }

    /// Whether this backend supports health checks.
    fn supports_health_checks(&self) -> bool {
        false
    }

    /// Whether this backend supports statistics retrieval.
    fn supports_statistics(&self) -> bool {
        false
    }

    /// Update or create a model reference.
    fn update_model(&self, _category: Category, _model_name: &str, _record: Value) -> Result<()> {
        Err(ModelRefError::NotSupported {
            backend: self.backend_name(),
            operation: "update_model",
        })
    }

    /// Delete a model reference.
    fn delete_model(&self, _category: Category, _model_name: &str) -> Result<()> {
        Err(ModelRefError::NotSupported {
            backend: self.backend_name(),
            operation: "delete_model",
        })
    }

    /// Pre-populate caches with all categories.
    async fn warm_cache(&self) -> Result<()> {
        Err(ModelRefError::NotSupported {
            backend: self.backend_name(),
            operation: "warm_cache",
        })
    }

    /// Check the health of the backend's external dependencies.
    fn health_check(&self) -> Result<bool> {
        Err(ModelRefError::NotSupported {
            backend: self.backend_name(),
            operation: "health_check",
        })
    }

    /// Backend-specific performance and usage statistics.
    fn get_statistics(&self) -> Result<Value> {
        Err(ModelRefError::NotSupported {
            backend: self.backend_name(),
            operation: "get_statistics",
        })
    }
}
