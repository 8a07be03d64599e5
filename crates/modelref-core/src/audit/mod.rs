//! Deletion-risk analysis and audit caching.
//!
//! This module provides:
//! - A handler-based rule engine computing deletion-risk flags
//! - Audit record assembly and category summaries
//! - Text model variant grouping
//! - A two-tier audit cache with background hydration

mod cache;
mod flags;
mod grouping;
mod hydrator;
mod info;
mod name_parser;

pub use cache::{AuditCache, AuditVariant, CacheFreshness};
pub use flags::{
    DeletionRiskFlags, DeletionRiskFlagsFactory, DeletionRiskHandler, GenericRiskHandler,
    ImageGenerationRiskHandler, TextGenerationRiskHandler,
};
pub use grouping::{
    apply_grouping_to_audit, group_audit_models, merge_deletion_flags, merge_usage_trends,
};
pub use hydrator::{AuditProvider, CacheHydrator};
pub use info::{
    AuditInfoHandler, CategoryAuditResponse, CategoryAuditSummary, CategoryScopedAuditHandler,
    ModelAuditInfo, ModelAuditInfoFactory, UsageTrend,
};
pub use name_parser::{get_base_model_name, is_quantized_variant, parse_model_name, ParsedModelName};
