//! Merging static model records with live Horde runtime data.

use crate::horde::models::{
    HordeModelStatsResponse, HordeModelStatus, HordeWorker, UsageStats, WorkerSummary,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Live runtime statistics for a model, aggregated from the Horde API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CombinedModelStatistics {
    #[serde(default)]
    pub queued_jobs: Option<u64>,
    #[serde(default)]
    pub performance: Option<f64>,
    #[serde(default)]
    pub eta: Option<i64>,
    #[serde(default)]
    pub queued: Option<u64>,
    #[serde(default)]
    pub usage_stats: Option<UsageStats>,
    /// Workers serving this model, keyed by worker id. None means detailed
    /// worker info was not fetched; an empty map means zero workers.
    #[serde(default)]
    pub worker_summaries: Option<HashMap<String, WorkerSummary>>,
    /// Worker count from the status endpoint, used when detailed worker
    /// summaries were not fetched.
    #[serde(default, skip_serializing)]
    pub worker_count_from_status: Option<u32>,
}

impl CombinedModelStatistics {
    /// Number of workers serving this model.
    ///
    /// Detailed summaries win when present (an empty map is a real zero);
    /// otherwise the status-endpoint count; otherwise 0.
    pub fn worker_count(&self) -> u32 {
        if let Some(ref summaries) = self.worker_summaries {
            return summaries.len() as u32;
        }
        self.worker_count_from_status.unwrap_or(0)
    }
}

/// Merge one model's reference entry with Horde runtime data.
pub fn merge_model_with_horde_data(
    model_name: &str,
    status: &HashMap<String, HordeModelStatus>,
    stats: &HordeModelStatsResponse,
    workers: Option<&[HordeWorker]>,
) -> CombinedModelStatistics {
    let mut combined = CombinedModelStatistics::default();

    if let Some(model_status) = status.get(model_name) {
        combined.queued_jobs = model_status.jobs;
        combined.performance = model_status.performance;
        combined.eta = model_status.eta;
        combined.queued = model_status.queued;
        combined.worker_count_from_status = Some(model_status.count);
    }

    let day = stats.day.get(model_name).copied();
    let month = stats.month.get(model_name).copied();
    let total = stats.total.get(model_name).copied();
    if day.is_some() || month.is_some() || total.is_some() {
        combined.usage_stats = Some(UsageStats {
            day: day.unwrap_or(0),
            month: month.unwrap_or(0),
            total: total.unwrap_or(0),
        });
    }

    if let Some(workers) = workers {
        let summaries: HashMap<String, WorkerSummary> = workers
            .iter()
            .filter(|w| w.models.iter().any(|m| m == model_name))
            .map(|w| {
                (
                    w.id.clone(),
                    WorkerSummary {
                        id: w.id.clone(),
                        name: w.name.clone(),
                        performance: w.performance.clone(),
                        online: w.online.unwrap_or(false),
                        trusted: w.trusted.unwrap_or(false),
                        uptime: w.uptime.unwrap_or(0),
                    },
                )
            })
            .collect();
        combined.worker_summaries = Some(summaries);
    }

    combined
}

/// Merge a whole category's model list with Horde runtime data.
///
/// Every requested model gets an entry; models the Horde has never seen
/// get empty statistics, which the audit layer reads as at-risk signals.
pub fn merge_category_with_horde_data(
    model_names: &[String],
    status: &HashMap<String, HordeModelStatus>,
    stats: &HordeModelStatsResponse,
    workers: Option<&[HordeWorker]>,
) -> HashMap<String, CombinedModelStatistics> {
    model_names
        .iter()
        .map(|name| {
            (
                name.clone(),
                merge_model_with_horde_data(name, status, stats, workers),
            )
        })
        .collect()
}
