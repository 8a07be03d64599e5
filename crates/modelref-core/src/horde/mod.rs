//! Integration with the external Horde API.
//!
//! The registry consumes three endpoints (model status, model stats,
//! workers) and merges them with static records to feed the audit engine.

mod client;
mod merge;
mod models;

pub use client::HordeApiClient;
pub use merge::{merge_category_with_horde_data, merge_model_with_horde_data, CombinedModelStatistics};
pub use models::{
    HordeModelStatsResponse, HordeModelStatus, HordeModelType, HordeWorker, UsageStats,
    WorkerSummary,
};
