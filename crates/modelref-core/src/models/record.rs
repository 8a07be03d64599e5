//! Typed model record structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One downloadable artifact of a model.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DownloadRecord {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub sha256sum: Option<String>,
}

/// Classification of a model: what it pertains to and what it is for.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelClassification {
    /// Domain, e.g. "image", "text", "video".
    #[serde(default)]
    pub domain: Option<String>,
    /// Purpose, e.g. "generation", "post_processing", "feature_extractor".
    #[serde(default)]
    pub purpose: Option<String>,
}

/// Per-model bookkeeping metadata.
///
/// `created_at`/`created_by` are immutable once set; updates refresh only
/// the `updated_*` pair.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecordMetadata {
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Download configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DownloadConfig {
    #[serde(default)]
    pub download: Vec<DownloadRecord>,
}

/// A model reference record.
///
/// Unknown category-specific fields are preserved via `extra` so that a
/// record read from disk and written back is byte-equivalent in content.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub classification: Option<ModelClassification>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub baseline: Option<String>,
    #[serde(default)]
    pub nsfw: Option<bool>,
    #[serde(default)]
    pub parameter_count: Option<u64>,
    #[serde(default)]
    pub size_on_disk_bytes: Option<u64>,
    #[serde(default)]
    pub config: Option<DownloadConfig>,
    #[serde(default)]
    pub metadata: Option<RecordMetadata>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ModelRecord {
    /// Parse a record from its raw JSON value.
    pub fn from_value(value: &serde_json::Value) -> crate::Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| crate::ModelRefError::Validation {
            field: "record".to_string(),
            message: e.to_string(),
        })
    }

    /// The download list, empty when no config is present.
    pub fn downloads(&self) -> &[DownloadRecord] {
        self.config
            .as_ref()
            .map(|c| c.download.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the record carries a non-blank description.
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }

    /// Model size in gigabytes, if size information is present and nonzero.
    pub fn size_gb(&self) -> Option<f64> {
        self.size_on_disk_bytes
            .filter(|b| *b > 0)
            .map(|b| b as f64 / (1024u64.pow(3) as f64))
    }
}
