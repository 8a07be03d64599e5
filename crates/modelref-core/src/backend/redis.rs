//! Redis-backed distributed cache for PRIMARY mode.
//!
//! Wraps a filesystem backend with a cross-worker shared cache. The file
//! backend stays the source of truth; Redis is a latency optimization. A
//! write on one worker publishes an invalidation that every subscribed
//! worker applies locally, and the entry TTL bounds staleness even when a
//! pub/sub message is lost.

use crate::backend::{
    FileSystemBackend, InvalidationCallback, InvalidationHub, ModelReferenceBackend,
};
use crate::config::RedisSettings;
use crate::metadata::CategoryMetadata;
use crate::models::{Category, ReferenceFormat, ReplicateMode};
use crate::{ModelRefError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use redis::Commands;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn category_key(prefix: &str, category: Category) -> String {
    format!("{}:category:{}", prefix, category)
}

fn metadata_key(prefix: &str, format: ReferenceFormat, category: Category) -> String {
    format!("{}:meta:{}:{}", prefix, format, category)
}

fn invalidation_channel(prefix: &str) -> String {
    format!("{}:invalidate", prefix)
}

/// Apply one invalidation message received from another worker.
///
/// Deletes the local Redis view of the category, marks the wrapped file
/// backend stale, and fires registered callbacks. Receiving the same
/// message twice lands in the same end state as receiving it once.
fn apply_invalidation(
    payload: &str,
    delete_key: &mut dyn FnMut(Category),
    file_backend: &FileSystemBackend,
    hub: &InvalidationHub,
) -> Result<Category> {
    let category = Category::from_str(payload)?;
    debug!("Received invalidation for {} from another worker", category);

    delete_key(category);
    file_backend.mark_stale(category);
    hub.notify(category);
    Ok(category)
}

/// Distributed cache backend wrapping a PRIMARY filesystem backend.
pub struct RedisBackend {
    file_backend: Arc<FileSystemBackend>,
    settings: RedisSettings,
    ttl: Duration,
    client: redis::Client,
    conn: Mutex<redis::Connection>,
    invalidation: Arc<InvalidationHub>,
    pubsub_running: Arc<AtomicBool>,
}

impl RedisBackend {
    /// Create a Redis backend wrapping `file_backend`.
    ///
    /// Fails fast if Redis is unreachable or the wrapped backend is not in
    /// PRIMARY mode; a distributed cache in front of a non-authoritative
    /// source would just replicate someone else's staleness.
    pub fn new(
        file_backend: Arc<FileSystemBackend>,
        settings: RedisSettings,
        cache_ttl: Option<Duration>,
    ) -> Result<Self> {
        if file_backend.replicate_mode() != ReplicateMode::Primary {
            return Err(ModelRefError::Config {
                message: "RedisBackend can only wrap a FileSystemBackend in PRIMARY mode. \
                          For REPLICA mode, use GitHubBackend or HttpBackend."
                    .to_string(),
            });
        }

        let ttl = settings
            .ttl
            .or(cache_ttl)
            .unwrap_or(crate::config::RegistryConfig::CACHE_TTL);

        let client = redis::Client::open(settings.url.as_str())?;
        let conn = client
            .get_connection_with_timeout(settings.socket_connect_timeout)
            .map_err(|e| {
                error!("Failed to connect to Redis: {}", e);
                ModelRefError::from(e)
            })?;
        conn.set_read_timeout(Some(settings.socket_timeout))?;
        conn.set_write_timeout(Some(settings.socket_timeout))?;
        info!("Redis connection established: {}", settings.url);

        let backend = Self {
            file_backend,
            settings,
            ttl,
            client,
            conn: Mutex::new(conn),
            invalidation: Arc::new(InvalidationHub::new()),
            pubsub_running: Arc::new(AtomicBool::new(false)),
        };

        if backend.settings.use_pubsub {
            backend.start_pubsub_listener();
        }

        Ok(backend)
    }

    fn start_pubsub_listener(&self) {
        let client = self.client.clone();
        let channel = invalidation_channel(&self.settings.key_prefix);
        let prefix = self.settings.key_prefix.clone();
        let file_backend = self.file_backend.clone();
        let hub = self.invalidation.clone();
        let running = self.pubsub_running.clone();

        running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("redis-backend-pubsub".to_string())
            .spawn(move || {
                debug!("Redis pub/sub listener started");
                let result = Self::listen_for_invalidations(
                    &client,
                    &channel,
                    &prefix,
                    &file_backend,
                    &hub,
                    &running,
                );
                if let Err(e) = result {
                    error!("Redis pub/sub listener error: {}", e);
                }
                debug!("Redis pub/sub listener stopped");
            });

        match handle {
            Ok(_) => info!("Redis pub/sub listening on {}", invalidation_channel(&self.settings.key_prefix)),
            Err(e) => {
                warn!("Failed to start Redis pub/sub listener: {}", e);
                self.pubsub_running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn listen_for_invalidations(
        client: &redis::Client,
        channel: &str,
        prefix: &str,
        file_backend: &FileSystemBackend,
        hub: &InvalidationHub,
        running: &AtomicBool,
    ) -> Result<()> {
        let mut sub_conn = client.get_connection()?;
        let mut pubsub = sub_conn.as_pubsub();
        pubsub.subscribe(channel)?;
        // A short read timeout lets the loop notice shutdown between messages
        pubsub.set_read_timeout(Some(Duration::from_secs(1)))?;

        // Deletes need a plain connection; the subscribed one is consumed
        // by pub/sub mode.
        let mut delete_conn = client.get_connection()?;

        while running.load(Ordering::SeqCst) {
            let message = match pubsub.get_message() {
                Ok(message) => message,
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e.into()),
            };

            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to decode invalidation message: {}", e);
                    continue;
                }
            };

            let mut delete_key = |category: Category| {
                let key = category_key(prefix, category);
                let deleted: redis::RedisResult<i64> = delete_conn.del(&key);
                match deleted {
                    Ok(_) => debug!("Invalidated local Redis cache for {}", category),
                    Err(e) => warn!("Failed to invalidate Redis cache for {}: {}", category, e),
                }
            };

            if let Err(e) = apply_invalidation(&payload, &mut delete_key, file_backend, hub) {
                warn!("Failed to process invalidation message: {}", e);
            }
        }

        Ok(())
    }

    /// Stop the pub/sub listener thread. Idempotent.
    pub fn shutdown(&self) {
        self.pubsub_running.store(false, Ordering::SeqCst);
    }

    /// Run a Redis operation with exponential backoff on connection errors.
    ///
    /// Unlike HTTP fetches, exhausted retries re-raise: there is no further
    /// fallback target, the caller decides whether to degrade.
    fn retry_redis<T>(
        &self,
        mut operation: impl FnMut(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().expect("redis connection lock poisoned");
        let max_attempts = self.settings.retry_max_attempts.max(1);

        for attempt in 0..max_attempts {
            match operation(&mut conn) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let transient = e.is_io_error()
                        || e.is_connection_dropped()
                        || e.is_timeout()
                        || e.is_connection_refusal();
                    if !transient || attempt + 1 >= max_attempts {
                        error!("Redis operation failed after {} attempts: {}", attempt + 1, e);
                        return Err(e.into());
                    }
                    let wait = self.settings.retry_backoff * 2u32.pow(attempt);
                    warn!("Redis connection error, retrying in {:?}: {}", wait, e);
                    std::thread::sleep(wait);
                    if let Ok(fresh) = self.client.get_connection() {
                        *conn = fresh;
                    }
                }
            }
        }

        unreachable!("Redis retry loop should have returned")
    }

    fn redis_get(&self, key: &str) -> Result<Option<String>> {
        self.retry_redis(|conn| conn.get(key))
    }

    fn redis_setex(&self, key: &str, value: &str) -> Result<()> {
        let ttl_secs = self.ttl.as_secs().max(1);
        self.retry_redis(|conn| conn.set_ex(key, value, ttl_secs))
    }

    fn redis_del(&self, key: &str) -> Result<()> {
        self.retry_redis(|conn| conn.del::<_, i64>(key).map(|_| ()))
    }

    fn redis_publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.retry_redis(|conn| conn.publish::<_, _, i64>(channel, payload).map(|_| ()))
    }

    /// Category metadata, read through the Redis metadata cache.
    pub fn get_metadata(
        &self,
        format: ReferenceFormat,
        category: Category,
    ) -> Result<CategoryMetadata> {
        let key = metadata_key(&self.settings.key_prefix, format, category);

        match self.redis_get(&key) {
            Ok(Some(cached)) => match serde_json::from_str::<CategoryMetadata>(&cached) {
                Ok(metadata) => return Ok(metadata),
                Err(e) => warn!("Corrupted cached metadata for {}: {}", category, e),
            },
            Ok(None) => debug!("Redis metadata miss for {} ({})", category, format),
            Err(e) => warn!(
                "Redis fetch failed for {} metadata, falling back to file: {}",
                category, e
            ),
        }

        let metadata = self.file_backend.get_metadata(format, category)?;

        match serde_json::to_string(&metadata) {
            Ok(json) => {
                if let Err(e) = self.redis_setex(&key, &json) {
                    warn!("Failed to cache metadata for {} in Redis: {}", category, e);
                }
            }
            Err(e) => warn!("Failed to serialize metadata for {}: {}", category, e),
        }

        Ok(metadata)
    }

    /// Metadata for every category with a sidecar, in the given format.
    pub fn get_all_metadata(
        &self,
        format: ReferenceFormat,
    ) -> HashMap<Category, CategoryMetadata> {
        let mut result = HashMap::new();
        for category in Category::ALL {
            if let Ok(metadata) = self.get_metadata(format, category) {
                result.insert(category, metadata);
            }
        }
        result
    }
}

impl Drop for RedisBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl ModelReferenceBackend for RedisBackend {
    fn backend_name(&self) -> &'static str {
        "RedisBackend"
    }

    fn replicate_mode(&self) -> ReplicateMode {
        ReplicateMode::Primary
    }

    async fn fetch_category(
        &self,
        category: Category,
        force_refresh: bool,
    ) -> Result<Option<Value>> {
        let key = category_key(&self.settings.key_prefix, category);

        if !force_refresh {
            match self.redis_get(&key) {
                Ok(Some(cached)) => match serde_json::from_str::<Value>(&cached) {
                    Ok(data) => {
                        debug!("Redis cache hit for {}", category);
                        return Ok(Some(data));
                    }
                    // Corrupted cache entries degrade to the source of truth
                    Err(e) => warn!("Corrupted Redis entry for {}: {}", category, e),
                },
                Ok(None) => debug!("Redis cache miss for {}", category),
                Err(e) => warn!(
                    "Redis fetch failed for {}, falling back to file: {}",
                    category, e
                ),
            }
        }

        let data = self.file_backend.fetch_category(category, force_refresh).await?;

        if let Some(ref value) = data {
            match serde_json::to_string(value) {
                Ok(json) => {
                    if let Err(e) = self.redis_setex(&key, &json) {
                        // The caller already has correct data from the
                        // source of truth; a failed write-through only
                        // costs the next reader a cache miss.
                        warn!("Failed to cache {} in Redis: {}", category, e);
                    } else {
                        debug!("Populated Redis cache for {}", category);
                    }
                }
                Err(e) => warn!("Failed to serialize {} for Redis: {}", category, e),
            }
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
        self.file_backend.needs_refresh(category)
    }

    fn mark_stale(&self, category: Category) {
        let key = category_key(&self.settings.key_prefix, category);

        // Publish first so other workers converge as soon as possible
        if self.settings.use_pubsub {
            let channel = invalidation_channel(&self.settings.key_prefix);
            match self.redis_publish(&channel, category.as_str()) {
                Ok(()) => debug!("Published invalidation for {}", category),
                Err(e) => warn!("Failed to publish invalidation for {}: {}", category, e),
            }
        }

        match self.redis_del(&key) {
            Ok(()) => debug!("Invalidated Redis cache for {}", category),
            Err(e) => warn!("Failed to invalidate Redis cache for {}: {}", category, e),
        }

        self.file_backend.mark_stale(category);
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
        self.file_backend.get_legacy_json(category, redownload).await
    }

    async fn get_legacy_json_string(
        &self,
        category: Category,
        redownload: bool,
    ) -> Result<Option<String>> {
        self.file_backend
            .get_legacy_json_string(category, redownload)
            .await
    }

    fn supports_writes(&self) -> bool {
        self.file_backend.supports_writes()
    }

    fn supports_cache_warming(&self) -> bool {
        true
    }

    fn supports_health_checks(&self) -> bool {
        true
    }

    fn supports_statistics(&self) -> bool {
        true
    }

    fn update_model(&self, category: Category, model_name: &str, record: Value) -> Result<()> {
        // Write-then-invalidate: a stale read must never race ahead of the
        // write it would be reading.
        self.file_backend.update_model(category, model_name, record)?;
        self.mark_stale(category);
        Ok(())
    }

    fn delete_model(&self, category: Category, model_name: &str) -> Result<()> {
        self.file_backend.delete_model(category, model_name)?;
        self.mark_stale(category);
        Ok(())
    }

    async fn warm_cache(&self) -> Result<()> {
        info!("Warming Redis cache...");
        for category in Category::ALL {
            if let Err(e) = self.fetch_category(category, true).await {
                warn!("Failed to warm cache for {}: {}", category, e);
            }
        }
        info!("Redis cache warming complete");
        Ok(())
    }

    fn health_check(&self) -> Result<bool> {
        let ping = self.retry_redis(|conn| redis::cmd("PING").query::<String>(conn));
        match ping {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn get_statistics(&self) -> Result<Value> {
        let keys_count = self.retry_redis(|conn| redis::cmd("DBSIZE").query::<i64>(conn));
        match keys_count {
            Ok(keys_count) => Ok(serde_json::json!({
                "connected": true,
                "keys_count": keys_count,
            })),
            Err(e) => Ok(serde_json::json!({
                "connected": false,
                "error": e.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            category_key("modelref", Category::ImageGeneration),
            "modelref:category:image_generation"
        );
        assert_eq!(
            metadata_key("modelref", ReferenceFormat::Legacy, Category::Clip),
            "modelref:meta:legacy:clip"
        );
        assert_eq!(
            metadata_key("modelref", ReferenceFormat::V2, Category::Clip),
            "modelref:meta:v2:clip"
        );
        assert_eq!(invalidation_channel("modelref"), "modelref:invalidate");
    }

    #[test]
    fn test_apply_invalidation_marks_backend_stale() {
        let temp_dir = TempDir::new().unwrap();
        let file_backend =
            FileSystemBackend::new(temp_dir.path(), ReplicateMode::Primary).unwrap();
        let hub = InvalidationHub::new();

        let deletes = AtomicUsize::new(0);
        let mut delete_key = |category: Category| {
            assert_eq!(category, Category::TextGeneration);
            deletes.fetch_add(1, Ordering::SeqCst);
        };

        let category =
            apply_invalidation("text_generation", &mut delete_key, &file_backend, &hub).unwrap();
        assert_eq!(category, Category::TextGeneration);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert!(file_backend.needs_refresh(Category::TextGeneration));
    }

    #[test]
    fn test_apply_invalidation_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let file_backend =
            FileSystemBackend::new(temp_dir.path(), ReplicateMode::Primary).unwrap();
        let hub = InvalidationHub::new();

        let notified = Arc::new(AtomicUsize::new(0));
        let count = notified.clone();
        hub.register(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        let mut delete_key = |_category: Category| {};

        // Applying the same message twice lands in the same end state
        apply_invalidation("clip", &mut delete_key, &file_backend, &hub).unwrap();
        apply_invalidation("clip", &mut delete_key, &file_backend, &hub).unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert!(file_backend.needs_refresh(Category::Clip));
    }

    #[test]
    fn test_apply_invalidation_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let file_backend =
            FileSystemBackend::new(temp_dir.path(), ReplicateMode::Primary).unwrap();
        let hub = InvalidationHub::new();

        let mut delete_key = |_category: Category| {};
        let result = apply_invalidation("not_a_category", &mut delete_key, &file_backend, &hub);
        assert!(result.is_err());
    }
}
