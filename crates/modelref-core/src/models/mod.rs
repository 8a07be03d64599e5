//! Data model for the model reference registry.
//!
//! Categories partition the registry; each category owns one JSON document
//! keyed by model name. Records are kept serde-permissive so that
//! category-specific fields survive a read/write round trip untouched.

mod record;

pub use record::{DownloadConfig, DownloadRecord, ModelClassification, ModelRecord, RecordMetadata};

use serde::{Deserialize, Serialize};

/// A partition of the model registry.
///
/// This is a stable, closed set; categories are never created or destroyed
/// at runtime. The serialized value doubles as the wire value used in file
/// names, Redis keys and the pub/sub invalidation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ImageGeneration,
    TextGeneration,
    Clip,
    Blip,
    Codeformer,
    Controlnet,
    Esrgan,
    Gfpgan,
    SafetyChecker,
    Miscellaneous,
}

impl Category {
    /// All categories, in stable iteration order.
    pub const ALL: [Category; 10] = [
        Category::ImageGeneration,
        Category::TextGeneration,
        Category::Clip,
        Category::Blip,
        Category::Codeformer,
        Category::Controlnet,
        Category::Esrgan,
        Category::Gfpgan,
        Category::SafetyChecker,
        Category::Miscellaneous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ImageGeneration => "image_generation",
            Category::TextGeneration => "text_generation",
            Category::Clip => "clip",
            Category::Blip => "blip",
            Category::Codeformer => "codeformer",
            Category::Controlnet => "controlnet",
            Category::Esrgan => "esrgan",
            Category::Gfpgan => "gfpgan",
            Category::SafetyChecker => "safety_checker",
            Category::Miscellaneous => "miscellaneous",
        }
    }

    /// Whether records in this category carry a baseline field.
    pub fn has_baseline(&self) -> bool {
        matches!(self, Category::ImageGeneration | Category::TextGeneration)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = crate::ModelRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "stable_diffusion" is the historical name of the image category
        // and still appears in mirrored legacy data.
        match s {
            "image_generation" | "stable_diffusion" => Ok(Category::ImageGeneration),
            "text_generation" => Ok(Category::TextGeneration),
            "clip" => Ok(Category::Clip),
            "blip" => Ok(Category::Blip),
            "codeformer" => Ok(Category::Codeformer),
            "controlnet" => Ok(Category::Controlnet),
            "esrgan" => Ok(Category::Esrgan),
            "gfpgan" => Ok(Category::Gfpgan),
            "safety_checker" => Ok(Category::SafetyChecker),
            "miscellaneous" => Ok(Category::Miscellaneous),
            other => Err(crate::ModelRefError::Validation {
                field: "category".to_string(),
                message: format!("Unknown category: {}", other),
            }),
        }
    }
}

/// Replication mode of a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateMode {
    /// Authoritative source of truth; supports writes.
    Primary,
    /// Read-only mirror sourcing from PRIMARY or GitHub.
    Replica,
}

impl std::fmt::Display for ReplicateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicateMode::Primary => write!(f, "primary"),
            ReplicateMode::Replica => write!(f, "replica"),
        }
    }
}

/// Serialization format of a model reference document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFormat {
    /// The historical, loosely-structured schema mirrored to GitHub.
    Legacy,
    /// The current strongly-typed canonical schema.
    V2,
}

impl ReferenceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceFormat::Legacy => "legacy",
            ReferenceFormat::V2 => "v2",
        }
    }
}

impl std::fmt::Display for ReferenceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_category_roundtrip() {
        for category in Category::ALL {
            let parsed = Category::from_str(category.as_str()).unwrap();
            assert_eq!(category, parsed);
        }
    }

    #[test]
    fn test_category_serde_wire_value() {
        let json = serde_json::to_string(&Category::ImageGeneration).unwrap();
        assert_eq!(json, "\"image_generation\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Category::ImageGeneration);
    }

    #[test]
    fn test_legacy_alias_parses() {
        assert_eq!(
            Category::from_str("stable_diffusion").unwrap(),
            Category::ImageGeneration
        );
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!(Category::from_str("video_generation").is_err());
    }

    #[test]
    fn test_baseline_applicability() {
        assert!(Category::ImageGeneration.has_baseline());
        assert!(Category::TextGeneration.has_baseline());
        assert!(!Category::Esrgan.has_baseline());
    }
}
