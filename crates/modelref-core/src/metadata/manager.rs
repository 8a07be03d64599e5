//! Category metadata tracking for model reference operations.
//!
//! Every write-capable backend records its create/update/delete operations
//! here, per category and per format (legacy vs v2). Sidecar files live at
//! `meta/{format}/{category}_metadata.json` under the registry base path.

use crate::metadata::atomic::{atomic_read_json, atomic_write_json};
use crate::models::{Category, ReferenceFormat};
use crate::{ModelRefError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Type of CRUD operation performed on model references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

/// Metadata tracking for a single category in one format.
///
/// `initialization_time` is set once and never changes; `last_updated` is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryMetadata {
    pub category: Category,
    /// Unix timestamp when metadata was last updated.
    pub last_updated: i64,
    #[serde(default)]
    pub last_operation_type: Option<OperationType>,
    #[serde(default)]
    pub last_operation_model: Option<String>,

    #[serde(default)]
    pub total_creates: u64,
    #[serde(default)]
    pub total_updates: u64,
    #[serde(default)]
    pub total_deletes: u64,
    /// Current total number of models in the category, set by startup scans.
    #[serde(default)]
    pub total_models: u64,

    /// Unix timestamp when metadata was first created. Immutable.
    pub initialization_time: i64,
    pub last_successful_operation: i64,
    #[serde(default)]
    pub error_count: u64,

    #[serde(default = "default_schema_version")]
    pub metadata_schema_version: String,
    pub backend_type: String,
}

fn default_schema_version() -> String {
    "1.0.0".to_string()
}

impl CategoryMetadata {
    fn new(category: Category, backend_type: &str, now: i64) -> Self {
        Self {
            category,
            last_updated: now,
            last_operation_type: None,
            last_operation_model: None,
            total_creates: 0,
            total_updates: 0,
            total_deletes: 0,
            total_models: 0,
            initialization_time: now,
            last_successful_operation: now,
            error_count: 0,
            metadata_schema_version: default_schema_version(),
            backend_type: backend_type.to_string(),
        }
    }
}

#[derive(Default)]
struct FormatCache {
    entries: HashMap<Category, CategoryMetadata>,
    cached_at: HashMap<Category, Instant>,
    mtimes: HashMap<Category, SystemTime>,
    stale: HashSet<Category>,
}

/// Centralized manager for category metadata sidecar files.
///
/// Legacy and v2 operations are tracked separately. All reads go through a
/// small TTL + mtime validated cache; all writes are atomic.
pub struct MetadataManager {
    base_path: PathBuf,
    cache_ttl: Duration,
    legacy: Mutex<FormatCache>,
    v2: Mutex<FormatCache>,
}

impl MetadataManager {
    /// Create a metadata manager rooted at the registry base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache_ttl: crate::config::RegistryConfig::CACHE_TTL,
            legacy: Mutex::new(FormatCache::default()),
            v2: Mutex::new(FormatCache::default()),
        }
    }

    /// Override the cache TTL (mostly for tests).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Ensure `meta/legacy` and `meta/v2` directories exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for format in [ReferenceFormat::Legacy, ReferenceFormat::V2] {
            let dir = self.format_dir(format);
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| ModelRefError::Io {
                    message: format!("Failed to create directory {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
                debug!("Created metadata directory: {}", dir.display());
            }
        }
        Ok(())
    }

    fn format_dir(&self, format: ReferenceFormat) -> PathBuf {
        self.base_path
            .join(crate::config::RegistryConfig::META_DIR_NAME)
            .join(format.as_str())
    }

    /// Sidecar path for a category in the given format.
    pub fn metadata_path(&self, format: ReferenceFormat, category: Category) -> PathBuf {
        self.format_dir(format)
            .join(format!("{}_metadata.json", category))
    }

    fn cache_for(&self, format: ReferenceFormat) -> &Mutex<FormatCache> {
        match format {
            ReferenceFormat::Legacy => &self.legacy,
            ReferenceFormat::V2 => &self.v2,
        }
    }

    fn is_cache_valid(&self, cache: &FormatCache, category: Category, path: &Path) -> bool {
        if cache.stale.contains(&category) {
            return false;
        }
        let Some(cached_at) = cache.cached_at.get(&category) else {
            return false;
        };
        if cached_at.elapsed() > self.cache_ttl {
            return false;
        }
        if let Ok(meta) = std::fs::metadata(path) {
            if let Ok(current_mtime) = meta.modified() {
                if cache.mtimes.get(&category) != Some(&current_mtime) {
                    return false;
                }
            }
        }
        true
    }

    fn refresh_cache(cache: &mut FormatCache, category: Category, path: &Path, metadata: &CategoryMetadata) {
        cache.entries.insert(category, metadata.clone());
        cache.cached_at.insert(category, Instant::now());
        if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
            cache.mtimes.insert(category, mtime);
        }
        cache.stale.remove(&category);
    }

    /// Get metadata for a category, initializing the sidecar if absent.
    ///
    /// Safe to call during startup seeding when no sidecar exists yet.
    pub fn get_or_initialize(
        &self,
        format: ReferenceFormat,
        category: Category,
        backend_type: &str,
    ) -> Result<CategoryMetadata> {
        let path = self.metadata_path(format, category);
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");

        let metadata = match atomic_read_json::<CategoryMetadata>(&path)? {
            Some(existing) => existing,
            None => {
                let created =
                    CategoryMetadata::new(category, backend_type, chrono::Utc::now().timestamp());
                atomic_write_json(&path, &created, false)?;
                debug!("Initialized {} metadata for {}", format, category);
                created
            }
        };

        Self::refresh_cache(&mut cache, category, &path, &metadata);
        Ok(metadata)
    }

    /// Record a create/update/delete operation for observability.
    ///
    /// Increments the matching counter on success, always refreshes
    /// `last_updated` and the last-operation fields, and persists the
    /// sidecar atomically.
    pub fn record_operation(
        &self,
        format: ReferenceFormat,
        category: Category,
        operation: OperationType,
        model_name: &str,
        success: bool,
        backend_type: &str,
    ) -> Result<CategoryMetadata> {
        let path = self.metadata_path(format, category);
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");

        let mut metadata = match atomic_read_json::<CategoryMetadata>(&path)? {
            Some(existing) => existing,
            None => CategoryMetadata::new(category, backend_type, chrono::Utc::now().timestamp()),
        };

        let now = chrono::Utc::now().timestamp();
        metadata.last_updated = metadata.last_updated.max(now);
        metadata.last_operation_type = Some(operation);
        metadata.last_operation_model = Some(model_name.to_string());

        if success {
            metadata.last_successful_operation = now;
            match operation {
                OperationType::Create => metadata.total_creates += 1,
                OperationType::Update => metadata.total_updates += 1,
                OperationType::Delete => metadata.total_deletes += 1,
            }
        }

        atomic_write_json(&path, &metadata, false)?;
        Self::refresh_cache(&mut cache, category, &path, &metadata);

        debug!(
            "Recorded {} {} for {}/{} (creates={}, updates={}, deletes={})",
            format,
            operation,
            category,
            model_name,
            metadata.total_creates,
            metadata.total_updates,
            metadata.total_deletes
        );

        Ok(metadata)
    }

    /// Record an operation error for observability.
    pub fn record_error(
        &self,
        format: ReferenceFormat,
        category: Category,
        error_info: &str,
        backend_type: &str,
    ) -> Result<CategoryMetadata> {
        let path = self.metadata_path(format, category);
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");

        let mut metadata = match atomic_read_json::<CategoryMetadata>(&path)? {
            Some(existing) => existing,
            None => CategoryMetadata::new(category, backend_type, chrono::Utc::now().timestamp()),
        };

        metadata.error_count += 1;
        metadata.last_updated = metadata.last_updated.max(chrono::Utc::now().timestamp());

        atomic_write_json(&path, &metadata, false)?;
        Self::refresh_cache(&mut cache, category, &path, &metadata);

        warn!("Recorded {} error for {}: {}", format, category, error_info);
        Ok(metadata)
    }

    /// Update the tracked model count after a startup scan.
    pub fn set_total_models(
        &self,
        format: ReferenceFormat,
        category: Category,
        total_models: u64,
        backend_type: &str,
    ) -> Result<CategoryMetadata> {
        let path = self.metadata_path(format, category);
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");

        let mut metadata = match atomic_read_json::<CategoryMetadata>(&path)? {
            Some(existing) => existing,
            None => CategoryMetadata::new(category, backend_type, chrono::Utc::now().timestamp()),
        };

        metadata.total_models = total_models;
        atomic_write_json(&path, &metadata, false)?;
        Self::refresh_cache(&mut cache, category, &path, &metadata);
        Ok(metadata)
    }

    /// Get metadata for a category.
    ///
    /// Reads through the TTL + mtime validated cache; errors if no sidecar
    /// exists on disk.
    pub fn get_metadata(
        &self,
        format: ReferenceFormat,
        category: Category,
    ) -> Result<CategoryMetadata> {
        let path = self.metadata_path(format, category);
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");

        if self.is_cache_valid(&cache, category, &path) {
            if let Some(cached) = cache.entries.get(&category) {
                return Ok(cached.clone());
            }
        }

        let metadata =
            atomic_read_json::<CategoryMetadata>(&path)?.ok_or(ModelRefError::MetadataMissing {
                category,
                format: format.to_string(),
            })?;

        Self::refresh_cache(&mut cache, category, &path, &metadata);
        Ok(metadata)
    }

    /// Get metadata for all categories that have a sidecar on disk.
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

    /// Mark a category's cached metadata as stale.
    pub fn mark_stale(&self, format: ReferenceFormat, category: Category) {
        let mut cache = self.cache_for(format).lock().expect("metadata lock poisoned");
        cache.stale.insert(category);
    }
}
