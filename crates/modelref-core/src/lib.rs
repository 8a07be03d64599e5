//! Core library for the model reference registry.
//!
//! Maintains AI model metadata across categories behind pluggable storage
//! backends: the local filesystem as the PRIMARY source of truth, GitHub
//! and HTTP replicas with fallback chaining, and a Redis-backed
//! distributed cache with pub/sub invalidation. On top of the registry, an
//! audit engine merges static records with live Horde usage statistics to
//! compute deletion-risk signals.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelref_core::backend::{FileSystemBackend, ModelReferenceBackend};
//! use modelref_core::models::{Category, ReplicateMode};
//!
//! #[tokio::main]
//! async fn main() -> modelref_core::Result<()> {
//!     let backend = FileSystemBackend::new("/var/lib/modelref", ReplicateMode::Primary)?;
//!     let models = backend.fetch_category(Category::ImageGeneration, false).await?;
//!     println!("Loaded {} models", models.map(|m| m.as_object().map(|o| o.len()).unwrap_or(0)).unwrap_or(0));
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod horde;
pub mod metadata;
pub mod models;
pub mod network;

// Re-export commonly used types
pub use audit::{
    AuditCache, AuditVariant, CacheHydrator, CategoryAuditResponse, DeletionRiskFlags,
    DeletionRiskFlagsFactory, ModelAuditInfo, ModelAuditInfoFactory,
};
pub use backend::{
    FileSystemBackend, GitHubBackend, HttpBackend, ModelReferenceBackend, RedisBackend,
};
pub use config::{AuditSettings, GithubRepoSettings, HydratorSettings, RedisSettings};
pub use error::{ModelRefError, Result};
pub use horde::{CombinedModelStatistics, HordeApiClient};
pub use metadata::{CategoryMetadata, MetadataManager, OperationType};
pub use models::{Category, ModelRecord, ReferenceFormat, ReplicateMode};
