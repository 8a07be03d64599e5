//! Shared cache and staleness bookkeeping for backends.
//!
//! Every backend that caches category payloads composes a `ReplicaCache`
//! instead of rolling its own TTL math, so the freshness semantics cannot
//! drift between the GitHub and HTTP replicas.
//!
//! The cache distinguishes three states per category: never loaded, fresh,
//! and stale. `is_cache_valid` answers "can I serve this?" and treats a
//! never-loaded category as invalid; `needs_refresh` answers "should I
//! refetch what I have?" and treats a never-loaded category as *not*
//! needing refresh, since the first fetch is a separate concern.

use crate::models::Category;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

#[derive(Default)]
struct CacheSide {
    payloads: HashMap<Category, Option<Value>>,
    strings: HashMap<Category, Option<String>>,
    timestamps: HashMap<Category, Instant>,
    mtimes: HashMap<Category, SystemTime>,
    stale: HashSet<Category>,
}

impl CacheSide {
    fn has_entry(&self, category: Category) -> bool {
        self.payloads.contains_key(&category) || self.strings.contains_key(&category)
    }

    fn mark_fresh(&mut self, category: Category, file_path: Option<&Path>) {
        self.timestamps.insert(category, Instant::now());
        self.stale.remove(&category);
        if let Some(path) = file_path {
            if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
                self.mtimes.insert(category, mtime);
            }
        }
    }

    fn mtime_changed(&self, category: Category, file_path: Option<&Path>) -> bool {
        let Some(path) = file_path else {
            return false;
        };
        if !path.exists() {
            return false;
        }
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(current) => self.mtimes.get(&category) != Some(&current),
            // An unreadable file cannot be trusted as fresh
            Err(_) => true,
        }
    }
}

/// TTL- and mtime-validated category cache with explicit staleness marking.
pub struct ReplicaCache {
    ttl: Option<Duration>,
    v2: Mutex<CacheSide>,
    legacy: Mutex<CacheSide>,
}

impl ReplicaCache {
    /// Create a cache. `ttl` of None means entries never expire by age.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            v2: Mutex::new(CacheSide::default()),
            legacy: Mutex::new(CacheSide::default()),
        }
    }

    /// The TTL currently enforced for cached payloads.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn expired(&self, cached_at: &Instant) -> bool {
        match self.ttl {
            Some(ttl) => cached_at.elapsed() > ttl,
            None => false,
        }
    }

    /// Whether cached data exists for this category, valid or not.
    pub fn has_cached_data(&self, category: Category) -> bool {
        self.v2.lock().expect("cache lock poisoned").has_entry(category)
    }

    /// Number of categories with a cached payload entry.
    pub fn cache_size(&self) -> usize {
        self.v2.lock().expect("cache lock poisoned").payloads.len()
    }

    /// Whether the cached entry exists and passes every validation check.
    ///
    /// False for both "never loaded" and "stale"; use `has_cached_data` to
    /// tell those apart.
    pub fn is_cache_valid(&self, category: Category, file_path: Option<&Path>) -> bool {
        let mut side = self.v2.lock().expect("cache lock poisoned");
        if side.stale.contains(&category) {
            debug!("Category {} marked stale, cache invalid", category);
            return false;
        }
        if !side.has_entry(category) {
            return false;
        }
        let Some(cached_at) = side.timestamps.get(&category).copied() else {
            return false;
        };
        if self.expired(&cached_at) {
            debug!("Category {} TTL expired, cache invalid", category);
            side.stale.insert(category);
            return false;
        }
        if side.mtime_changed(category, file_path) {
            debug!("Source file for {} changed on disk, cache invalid", category);
            side.stale.insert(category);
            return false;
        }
        true
    }

    /// Whether existing cached data should be refetched.
    ///
    /// A category with no cached entry yet does NOT need refresh; that is
    /// the first-fetch case, handled by callers separately.
    pub fn needs_refresh(&self, category: Category, file_path: Option<&Path>) -> bool {
        let mut side = self.v2.lock().expect("cache lock poisoned");
        if side.stale.contains(&category) {
            return true;
        }
        let Some(cached_at) = side.timestamps.get(&category).copied() else {
            return false;
        };
        if self.expired(&cached_at) {
            side.stale.insert(category);
            return true;
        }
        if side.mtime_changed(category, file_path) {
            side.stale.insert(category);
            return true;
        }
        false
    }

    /// Idempotently mark a category stale.
    pub fn mark_stale(&self, category: Category) {
        self.v2
            .lock()
            .expect("cache lock poisoned")
            .stale
            .insert(category);
    }

    /// Get cached data if valid; None means fetch (initial or refresh).
    pub fn get(&self, category: Category, file_path: Option<&Path>) -> Option<Value> {
        if self.is_cache_valid(category, file_path) {
            debug!("Cache hit for {}", category);
            self.v2
                .lock()
                .expect("cache lock poisoned")
                .payloads
                .get(&category)
                .cloned()
                .flatten()
        } else {
            debug!("Cache miss for {}", category);
            None
        }
    }

    /// Store fetched data and mark the category fresh.
    ///
    /// Storing None records "checked but not found" without marking fresh,
    /// so failed loads do not suppress retries.
    pub fn store(&self, category: Category, data: Option<Value>, file_path: Option<&Path>) {
        let mut side = self.v2.lock().expect("cache lock poisoned");
        let has_data = data.is_some();
        side.payloads.insert(category, data);
        if has_data {
            side.mark_fresh(category, file_path);
            debug!("Stored {} in cache", category);
        } else {
            debug!("Stored None for {}, not marking fresh", category);
        }
    }

    /// Validity check for the legacy-format cache.
    pub fn is_legacy_cache_valid(&self, category: Category, file_path: Option<&Path>) -> bool {
        let side = self.legacy.lock().expect("cache lock poisoned");
        if side.stale.contains(&category) {
            return false;
        }
        if !side.has_entry(category) {
            return false;
        }
        let Some(cached_at) = side.timestamps.get(&category) else {
            return false;
        };
        if self.expired(cached_at) {
            return false;
        }
        !side.mtime_changed(category, file_path)
    }

    /// Get cached legacy data (dict and string faces) if valid.
    pub fn get_legacy(
        &self,
        category: Category,
        file_path: Option<&Path>,
    ) -> (Option<Value>, Option<String>) {
        if self.is_legacy_cache_valid(category, file_path) {
            debug!("Legacy cache hit for {}", category);
            let side = self.legacy.lock().expect("cache lock poisoned");
            (
                side.payloads.get(&category).cloned().flatten(),
                side.strings.get(&category).cloned().flatten(),
            )
        } else {
            debug!("Legacy cache miss for {}", category);
            (None, None)
        }
    }

    /// Store legacy data in both faces and mark the legacy entry fresh.
    pub fn store_legacy(
        &self,
        category: Category,
        legacy_dict: Option<Value>,
        legacy_string: Option<String>,
        file_path: Option<&Path>,
    ) {
        let mut side = self.legacy.lock().expect("cache lock poisoned");
        let has_data = legacy_dict.is_some() || legacy_string.is_some();
        side.payloads.insert(category, legacy_dict);
        side.strings.insert(category, legacy_string);
        if has_data {
            side.mark_fresh(category, file_path);
        }
    }

    /// Idempotently mark a category's legacy cache stale.
    pub fn mark_legacy_stale(&self, category: Category) {
        self.legacy
            .lock()
            .expect("cache lock poisoned")
            .stale
            .insert(category);
    }

    /// Shift a category's freshness timestamp into the past, as if it had
    /// been cached `by` ago. Test-only time control.
    #[cfg(test)]
    pub fn backdate(&self, category: Category, by: Duration) {
        let mut side = self.v2.lock().expect("cache lock poisoned");
        if let Some(ts) = side.timestamps.get_mut(&category) {
            if let Some(shifted) = ts.checked_sub(by) {
                *ts = shifted;
            }
        }
    }
}
