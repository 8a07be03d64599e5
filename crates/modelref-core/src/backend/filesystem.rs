//! Filesystem backend for PRIMARY mode.
//!
//! Reads and writes model reference JSON documents directly on the local
//! filesystem. This is the source of truth for PRIMARY deployments; it
//! never talks to GitHub or any remote service.

use crate::backend::replica::ReplicaCache;
use crate::backend::{InvalidationCallback, InvalidationHub, ModelReferenceBackend};
use crate::metadata::{self, MetadataManager, OperationType};
use crate::models::{Category, ModelRecord, ReferenceFormat, ReplicateMode};
use crate::{ModelRefError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of a startup metadata population scan.
#[derive(Debug, Default, Clone)]
pub struct MetadataPopulationResult {
    pub categories_processed: Vec<Category>,
    pub total_models_updated: u64,
}

/// Backend that reads/writes model references on the local filesystem.
pub struct FileSystemBackend {
    base_path: PathBuf,
    cache: ReplicaCache,
    metadata: MetadataManager,
    invalidation: InvalidationHub,
    /// Serializes read-modify-write cycles on category documents.
    write_lock: Mutex<()>,
}

impl FileSystemBackend {
    /// Create a filesystem backend rooted at `base_path`.
    ///
    /// Only PRIMARY mode is valid; replicas read from GitHub or a PRIMARY
    /// server instead of local files.
    pub fn new(base_path: impl Into<PathBuf>, mode: ReplicateMode) -> Result<Self> {
        if mode != ReplicateMode::Primary {
            return Err(ModelRefError::Config {
                message: "FileSystemBackend can only be used in PRIMARY mode. \
                          For REPLICA mode, use GitHubBackend or HttpBackend."
                    .to_string(),
            });
        }

        let base_path = base_path.into();
        let metadata = MetadataManager::new(&base_path);
        metadata.ensure_directories()?;

        debug!("FileSystemBackend initialized with base_path={}", base_path.display());

        Ok(Self {
            base_path,
            cache: ReplicaCache::new(Some(crate::config::RegistryConfig::CACHE_TTL)),
            metadata,
            invalidation: InvalidationHub::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Override the category cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ReplicaCache::new(Some(ttl));
        self
    }

    /// Path of the canonical v2 document for a category.
    pub fn category_file_path(&self, category: Category) -> PathBuf {
        self.base_path
            .join(crate::config::RegistryConfig::V2_DIR_NAME)
            .join(format!("{}.json", category))
    }

    /// Path of the legacy document for a category.
    pub fn legacy_file_path(&self, category: Category) -> PathBuf {
        self.base_path
            .join(crate::config::RegistryConfig::LEGACY_DIR_NAME)
            .join(format!("{}.json", category))
    }

    /// Access to the category metadata manager.
    pub fn metadata_manager(&self) -> &MetadataManager {
        &self.metadata
    }

    fn read_category_document(&self, category: Category) -> Result<Option<Value>> {
        let path = self.category_file_path(category);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ModelRefError::io_with_path(e, path.clone()))?;
        let data: Value = serde_json::from_str(&contents).map_err(|e| ModelRefError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })?;
        Ok(Some(data))
    }

    fn write_category_document(&self, category: Category, document: &Value) -> Result<()> {
        let path = self.category_file_path(category);
        metadata::atomic_write_json(&path, document, true)
    }

    /// Ensure sidecars and per-model timestamps exist for one category.
    pub fn ensure_category_metadata_populated(&self, category: Category) -> Result<u64> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");

        self.metadata
            .get_or_initialize(ReferenceFormat::V2, category, self.backend_name())?;
        self.metadata
            .get_or_initialize(ReferenceFormat::Legacy, category, self.backend_name())?;

        let Some(mut document) = self.read_category_document(category)? else {
            return Ok(0);
        };
        let Some(map) = document.as_object_mut() else {
            return Ok(0);
        };

        let now = chrono::Utc::now().timestamp();
        let mut updated = 0u64;
        for record in map.values_mut() {
            if metadata::ensure_metadata_populated(record, now) {
                updated += 1;
            }
        }

        let total_models = map.len() as u64;
        if updated > 0 {
            self.write_category_document(category, &document)?;
            self.cache.mark_stale(category);
        }
        self.metadata
            .set_total_models(ReferenceFormat::V2, category, total_models, self.backend_name())?;

        Ok(updated)
    }

    /// Startup scan: populate sidecars and per-model metadata everywhere.
    pub fn ensure_all_metadata_populated(&self) -> Result<MetadataPopulationResult> {
        let mut result = MetadataPopulationResult::default();
        for category in Category::ALL {
            result.total_models_updated += self.ensure_category_metadata_populated(category)?;
            result.categories_processed.push(category);
        }
        info!(
            "Startup metadata population: {} categories, {} models updated",
            result.categories_processed.len(),
            result.total_models_updated
        );
        Ok(result)
    }

    /// Category metadata in the given format.
    pub fn get_metadata(
        &self,
        format: ReferenceFormat,
        category: Category,
    ) -> Result<crate::metadata::CategoryMetadata> {
        self.metadata.get_metadata(format, category)
    }
}

#[async_trait]
impl ModelReferenceBackend for FileSystemBackend {
    fn backend_name(&self) -> &'static str {
        "FileSystemBackend"
    }

    fn replicate_mode(&self) -> ReplicateMode {
        ReplicateMode::Primary
    }

    async fn fetch_category(
        &self,
        category: Category,
        force_refresh: bool,
    ) -> Result<Option<Value>> {
        let path = self.category_file_path(category);

        if !force_refresh {
            if let Some(cached) = self.cache.get(category, Some(&path)) {
                return Ok(Some(cached));
            }
        }

        let data = self.read_category_document(category)?;
        self.cache.store(category, data.clone(), Some(&path));
        Ok(data)
    }

    fn needs_refresh(&self, category: Category) -> bool {
        let path = self.category_file_path(category);
        self.cache.needs_refresh(category, Some(&path))
    }

    fn mark_stale(&self, category: Category) {
        self.cache.mark_stale(category);
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
        let path = self.legacy_file_path(category);

        if !redownload {
            let (cached, _) = self.cache.get_legacy(category, Some(&path));
            if cached.is_some() {
                return Ok(cached);
            }
        }

        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| ModelRefError::io_with_path(e, path.clone()))?;
        let data: Value = serde_json::from_str(&contents).map_err(|e| ModelRefError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })?;

        self.cache
            .store_legacy(category, Some(data.clone()), Some(contents), Some(&path));
        Ok(Some(data))
    }

    async fn get_legacy_json_string(
        &self,
        category: Category,
        redownload: bool,
    ) -> Result<Option<String>> {
        let path = self.legacy_file_path(category);

        if !redownload {
            let (_, cached) = self.cache.get_legacy(category, Some(&path));
            if cached.is_some() {
                return Ok(cached);
            }
        }

        // Populate both cache faces through the dict path
        self.get_legacy_json(category, redownload).await?;
        let (_, string) = self.cache.get_legacy(category, Some(&path));
        Ok(string)
    }

    fn supports_writes(&self) -> bool {
        true
    }

    fn update_model(&self, category: Category, model_name: &str, mut record: Value) -> Result<()> {
        // Reject records the schema cannot represent before touching disk
        ModelRecord::from_value(&record)?;

        let _guard = self.write_lock.lock().expect("write lock poisoned");

        let mut document = self
            .read_category_document(category)?
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let map = document.as_object_mut().ok_or_else(|| ModelRefError::Json {
            message: format!("Category document for {} is not an object", category),
            source: None,
        })?;

        let now = chrono::Utc::now().timestamp();
        let operation = if let Some(existing) = map.get(model_name) {
            metadata::preserve_creation_fields(existing, &mut record);
            metadata::set_update_timestamp(&mut record, now);
            OperationType::Update
        } else {
            metadata::ensure_metadata_populated(&mut record, now);
            OperationType::Create
        };

        map.insert(model_name.to_string(), record);

        if let Err(e) = self.write_category_document(category, &document) {
            self.metadata.record_error(
                ReferenceFormat::V2,
                category,
                &e.to_string(),
                self.backend_name(),
            )?;
            return Err(e);
        }

        info!("Updated model {} in category {}", model_name, category);
        self.metadata.record_operation(
            ReferenceFormat::V2,
            category,
            operation,
            model_name,
            true,
            self.backend_name(),
        )?;

        self.mark_stale(category);
        Ok(())
    }

    fn delete_model(&self, category: Category, model_name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");

        let mut document =
            self.read_category_document(category)?
                .ok_or_else(|| ModelRefError::ModelNotFound {
                    category,
                    model_name: model_name.to_string(),
                })?;
        let map = document.as_object_mut().ok_or_else(|| ModelRefError::Json {
            message: format!("Category document for {} is not an object", category),
            source: None,
        })?;

        if map.remove(model_name).is_none() {
            return Err(ModelRefError::ModelNotFound {
                category,
                model_name: model_name.to_string(),
            });
        }

        if let Err(e) = self.write_category_document(category, &document) {
            self.metadata.record_error(
                ReferenceFormat::V2,
                category,
                &e.to_string(),
                self.backend_name(),
            )?;
            return Err(e);
        }

        info!("Deleted model {} from category {}", model_name, category);
        self.metadata.record_operation(
            ReferenceFormat::V2,
            category,
            OperationType::Delete,
            model_name,
            true,
            self.backend_name(),
        )?;

        self.mark_stale(category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_backend() -> (FileSystemBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileSystemBackend::new(temp_dir.path(), ReplicateMode::Primary).unwrap();
        (backend, temp_dir)
    }

    #[test]
    fn test_replica_mode_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = FileSystemBackend::new(temp_dir.path(), ReplicateMode::Replica);
        assert!(matches!(result, Err(ModelRefError::Config { .. })));
    }

    #[tokio::test]
    async fn test_fetch_missing_category_is_none() {
        let (backend, _temp) = create_test_backend();
        let data = backend.fetch_category(Category::Clip, false).await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_update_then_fetch() {
        let (backend, _temp) = create_test_backend();

        backend
            .update_model(
                Category::ImageGeneration,
                "Deliberate",
                json!({"description": "general purpose", "baseline": "stable_diffusion_1"}),
            )
            .unwrap();

        let data = backend
            .fetch_category(Category::ImageGeneration, false)
            .await
            .unwrap()
            .unwrap();
        assert!(data.get("Deliberate").is_some());
        // Timestamps were populated on create
        assert!(data["Deliberate"]["metadata"]["created_at"].is_i64());
    }

    #[tokio::test]
    async fn test_update_preserves_created_fields() {
        let (backend, _temp) = create_test_backend();
        let category = Category::ImageGeneration;

        backend
            .update_model(
                category,
                "Deliberate",
                json!({
                    "description": "v1",
                    "metadata": {"created_at": 1700000000, "created_by": "seeder"}
                }),
            )
            .unwrap();

        backend
            .update_model(
                category,
                "Deliberate",
                json!({
                    "description": "v2",
                    "metadata": {"created_at": 1900000000, "created_by": "intruder"}
                }),
            )
            .unwrap();

        let data = backend.fetch_category(category, true).await.unwrap().unwrap();
        let metadata = &data["Deliberate"]["metadata"];
        assert_eq!(metadata["created_at"], 1700000000);
        assert_eq!(metadata["created_by"], "seeder");
        assert!(metadata["updated_at"].as_i64().unwrap() > 1700000000);
        assert_eq!(data["Deliberate"]["description"], "v2");
    }

    #[test]
    fn test_update_records_operation_counters() {
        let (backend, _temp) = create_test_backend();
        let category = Category::Esrgan;

        backend
            .update_model(category, "RealESRGAN_x4plus", json!({"description": "upscaler"}))
            .unwrap();
        backend
            .update_model(category, "RealESRGAN_x4plus", json!({"description": "4x upscaler"}))
            .unwrap();
        backend.delete_model(category, "RealESRGAN_x4plus").unwrap();

        let metadata = backend.get_metadata(ReferenceFormat::V2, category).unwrap();
        assert_eq!(metadata.total_creates, 1);
        assert_eq!(metadata.total_updates, 1);
        assert_eq!(metadata.total_deletes, 1);
    }

    #[test]
    fn test_delete_missing_model() {
        let (backend, _temp) = create_test_backend();
        let result = backend.delete_model(Category::Clip, "ghost");
        assert!(matches!(result, Err(ModelRefError::ModelNotFound { .. })));
    }

    #[test]
    fn test_write_notifies_invalidation_callbacks() {
        let (backend, _temp) = create_test_backend();
        let invalidated = Arc::new(AtomicUsize::new(0));

        let count = invalidated.clone();
        backend.register_invalidation_callback(Box::new(move |category| {
            assert_eq!(category, Category::Blip);
            count.fetch_add(1, Ordering::SeqCst);
        }));

        backend
            .update_model(Category::Blip, "BLIP_Large", json!({"description": "captioning"}))
            .unwrap();
        assert_eq!(invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_after_write_forces_reread() {
        let (backend, _temp) = create_test_backend();
        let category = Category::Gfpgan;

        backend
            .update_model(category, "GFPGAN", json!({"description": "face repair"}))
            .unwrap();
        let first = backend.fetch_category(category, false).await.unwrap().unwrap();
        assert_eq!(first.as_object().unwrap().len(), 1);

        backend
            .update_model(category, "GFPGANv2", json!({"description": "better face repair"}))
            .unwrap();
        assert!(backend.needs_refresh(category));

        let second = backend.fetch_category(category, false).await.unwrap().unwrap();
        assert_eq!(second.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_legacy_json_roundtrip() {
        let (backend, temp) = create_test_backend();
        let category = Category::ImageGeneration;

        let legacy_dir = temp.path().join("legacy");
        std::fs::create_dir_all(&legacy_dir).unwrap();
        std::fs::write(
            legacy_dir.join("image_generation.json"),
            r#"{"Deliberate": {"name": "Deliberate", "type": "ckpt"}}"#,
        )
        .unwrap();

        let legacy = backend.get_legacy_json(category, false).await.unwrap().unwrap();
        assert_eq!(legacy["Deliberate"]["type"], "ckpt");

        let string = backend
            .get_legacy_json_string(category, false)
            .await
            .unwrap()
            .unwrap();
        assert!(string.contains("Deliberate"));
    }

    #[test]
    fn test_startup_population_counts_models() {
        let (backend, temp) = create_test_backend();

        let v2_dir = temp.path().join("v2");
        std::fs::create_dir_all(&v2_dir).unwrap();
        std::fs::write(
            v2_dir.join("clip.json"),
            r#"{"ViT-L/14": {"description": "clip encoder"}}"#,
        )
        .unwrap();

        let result = backend.ensure_all_metadata_populated().unwrap();
        assert_eq!(result.categories_processed.len(), Category::ALL.len());
        assert_eq!(result.total_models_updated, 1);

        let metadata = backend.get_metadata(ReferenceFormat::V2, Category::Clip).unwrap();
        assert_eq!(metadata.total_models, 1);
    }

    #[test]
    fn test_invalid_record_rejected() {
        let (backend, _temp) = create_test_backend();
        // nsfw must be a boolean
        let result = backend.update_model(
            Category::ImageGeneration,
            "Broken",
            json!({"nsfw": "very"}),
        );
        assert!(matches!(result, Err(ModelRefError::Validation { .. })));
    }
}
