//! Caching layer for category audit results.
//!
//! Audit responses are expensive (they touch the Horde API), so they are
//! cached in two tiers: a process-local TTL cache, plus an optional Redis
//! tier shared across workers. Entries live past their freshness window up
//! to a longer stale bound, letting requests be served stale while the
//! hydrator recomputes in the background.

use crate::audit::info::CategoryAuditResponse;
use crate::backend::ModelReferenceBackend;
use crate::config::AuditSettings;
use crate::models::Category;
use mini_moka::sync::Cache;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Which variant of a category audit an entry caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuditVariant {
    /// Whether text model quantization variants are grouped.
    pub grouped: bool,
}

impl AuditVariant {
    pub const ALL: [AuditVariant; 2] = [AuditVariant { grouped: false }, AuditVariant { grouped: true }];

    fn key_segment(&self) -> &'static str {
        if self.grouped {
            "grouped"
        } else {
            "flat"
        }
    }
}

/// Freshness of a cached audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFreshness {
    /// Inside the freshness TTL; serve as-is.
    Fresh,
    /// Past the freshness TTL but inside the stale bound; servable while a
    /// refresh is pending.
    StaleButServable,
    /// Past the stale bound; must be recomputed.
    Expired,
}

#[derive(Clone)]
struct CachedAudit {
    response: CategoryAuditResponse,
    stored_at: Instant,
}

/// Two-tier cache for `CategoryAuditResponse`.
///
/// Construct one per process and share it via `Arc`; there is no hidden
/// global instance.
pub struct AuditCache {
    settings: AuditSettings,
    local: Cache<(Category, AuditVariant), CachedAudit>,
    redis: Option<redis::Client>,
    redis_key_prefix: String,
}

impl AuditCache {
    /// In-memory-only cache.
    pub fn new(settings: AuditSettings) -> Self {
        let stale_ttl = settings.audit_cache_stale_ttl;
        Self {
            settings,
            local: Cache::builder()
                .time_to_live(stale_ttl)
                .max_capacity(64)
                .build(),
            redis: None,
            redis_key_prefix: String::new(),
        }
    }

    /// Cache with a shared Redis tier under `{key_prefix}:audit`.
    pub fn with_redis(settings: AuditSettings, redis_url: &str, key_prefix: &str) -> crate::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut cache = Self::new(settings);
        cache.redis = Some(client);
        cache.redis_key_prefix = format!("{}:audit", key_prefix);
        Ok(cache)
    }

    fn redis_key(&self, category: Category, variant: AuditVariant) -> String {
        format!("{}:{}:{}", self.redis_key_prefix, category, variant.key_segment())
    }

    fn freshness(&self, stored_at: Instant) -> CacheFreshness {
        let age = stored_at.elapsed();
        if age <= self.settings.audit_cache_ttl {
            CacheFreshness::Fresh
        } else if age <= self.settings.audit_cache_stale_ttl {
            CacheFreshness::StaleButServable
        } else {
            CacheFreshness::Expired
        }
    }

    /// Get a cached response and its freshness. Expired entries are
    /// dropped, not returned.
    pub fn get(
        &self,
        category: Category,
        variant: AuditVariant,
    ) -> Option<(CategoryAuditResponse, CacheFreshness)> {
        if let Some(entry) = self.local.get(&(category, variant)) {
            let freshness = self.freshness(entry.stored_at);
            if freshness == CacheFreshness::Expired {
                self.local.invalidate(&(category, variant));
            } else {
                debug!("Audit cache hit for {} ({:?})", category, freshness);
                return Some((entry.response, freshness));
            }
        }

        // Redis tier: a hit hydrates the local tier as stale-but-servable
        if let Some(response) = self.get_from_redis(category, variant) {
            debug!("Audit cache hit in Redis for {}", category);
            return Some((response, CacheFreshness::StaleButServable));
        }

        None
    }

    fn get_from_redis(&self, category: Category, variant: AuditVariant) -> Option<CategoryAuditResponse> {
        let client = self.redis.as_ref()?;
        let key = self.redis_key(category, variant);
        let mut conn = match client.get_connection() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Audit cache Redis connection failed: {}", e);
                return None;
            }
        };
        let cached: Option<String> = redis::Commands::get(&mut conn, &key).ok()?;
        let payload = cached?;
        match serde_json::from_str(&payload) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("Corrupted audit cache entry for {}: {}", category, e);
                None
            }
        }
    }

    /// Store a freshly computed response in both tiers.
    pub fn set(&self, category: Category, variant: AuditVariant, response: CategoryAuditResponse) {
        if let Some(ref client) = self.redis {
            let key = self.redis_key(category, variant);
            match serde_json::to_string(&response) {
                Ok(json) => {
                    let ttl = self.settings.audit_cache_stale_ttl.as_secs().max(1);
                    match client.get_connection() {
                        Ok(mut conn) => {
                            let result: redis::RedisResult<()> =
                                redis::Commands::set_ex(&mut conn, &key, json, ttl);
                            if let Err(e) = result {
                                warn!("Failed to write audit cache to Redis: {}", e);
                            }
                        }
                        Err(e) => warn!("Audit cache Redis connection failed: {}", e),
                    }
                }
                Err(e) => warn!("Failed to serialize audit response: {}", e),
            }
        }

        self.local.insert(
            (category, variant),
            CachedAudit {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop both grouped and ungrouped entries for a category.
    pub fn invalidate(&self, category: Category) {
        for variant in AuditVariant::ALL {
            self.local.invalidate(&(category, variant));
            if let Some(ref client) = self.redis {
                let key = self.redis_key(category, variant);
                if let Ok(mut conn) = client.get_connection() {
                    let result: redis::RedisResult<i64> = redis::Commands::del(&mut conn, &key);
                    if let Err(e) = result {
                        warn!("Failed to delete audit cache key {}: {}", key, e);
                    }
                }
            }
        }
        debug!("Invalidated audit cache for {}", category);
    }

    /// Hook backend invalidations so model writes cascade into audit
    /// eviction.
    pub fn register_with_backend(self: &Arc<Self>, backend: &dyn ModelReferenceBackend) {
        let cache = Arc::downgrade(self);
        backend.register_invalidation_callback(Box::new(move |category| {
            if let Some(cache) = cache.upgrade() {
                cache.invalidate(category);
            }
        }));
        debug!("Audit cache registered invalidation callback with backend");
    }

    /// Shift an entry's stored-at time into the past. Test-only.
    #[cfg(test)]
    fn backdate(&self, category: Category, variant: AuditVariant, by: std::time::Duration) {
        if let Some(mut entry) = self.local.get(&(category, variant)) {
            if let Some(shifted) = entry.stored_at.checked_sub(by) {
                entry.stored_at = shifted;
                self.local.insert((category, variant), entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::info::CategoryAuditSummary;
    use crate::backend::FileSystemBackend;
    use crate::models::ReplicateMode;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_response(category: Category) -> CategoryAuditResponse {
        CategoryAuditResponse {
            category,
            category_total_month_usage: 1000,
            total_count: 0,
            returned_count: 0,
            offset: 0,
            limit: None,
            models: Vec::new(),
            summary: CategoryAuditSummary::from_audit_models(&[]),
        }
    }

    fn settings() -> AuditSettings {
        AuditSettings {
            audit_cache_ttl: Duration::from_secs(60),
            audit_cache_stale_ttl: Duration::from_secs(300),
            ..AuditSettings::default()
        }
    }

    #[test]
    fn test_tri_state_freshness() {
        let cache = AuditCache::new(settings());
        let variant = AuditVariant { grouped: false };
        let category = Category::ImageGeneration;

        assert!(cache.get(category, variant).is_none());

        cache.set(category, variant, sample_response(category));
        let (_, freshness) = cache.get(category, variant).unwrap();
        assert_eq!(freshness, CacheFreshness::Fresh);

        // Past the fresh TTL: still servable
        cache.backdate(category, variant, Duration::from_secs(120));
        let (_, freshness) = cache.get(category, variant).unwrap();
        assert_eq!(freshness, CacheFreshness::StaleButServable);

        // Past the stale bound: gone
        cache.backdate(category, variant, Duration::from_secs(600));
        assert!(cache.get(category, variant).is_none());
    }

    #[test]
    fn test_variants_cached_separately() {
        let cache = AuditCache::new(settings());
        let category = Category::TextGeneration;

        cache.set(category, AuditVariant { grouped: false }, sample_response(category));
        assert!(cache.get(category, AuditVariant { grouped: false }).is_some());
        assert!(cache.get(category, AuditVariant { grouped: true }).is_none());
    }

    #[test]
    fn test_invalidate_drops_both_variants() {
        let cache = AuditCache::new(settings());
        let category = Category::TextGeneration;

        for variant in AuditVariant::ALL {
            cache.set(category, variant, sample_response(category));
        }
        cache.invalidate(category);

        for variant in AuditVariant::ALL {
            assert!(cache.get(category, variant).is_none());
        }
    }

    #[test]
    fn test_backend_write_cascades_into_audit_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSystemBackend::new(temp_dir.path(), ReplicateMode::Primary).unwrap();
        let cache = Arc::new(AuditCache::new(settings()));
        cache.register_with_backend(&backend);

        let category = Category::ImageGeneration;
        cache.set(category, AuditVariant { grouped: false }, sample_response(category));

        backend
            .update_model(category, "Deliberate", serde_json::json!({"description": "x"}))
            .unwrap();

        assert!(cache.get(category, AuditVariant { grouped: false }).is_none());
    }
}
