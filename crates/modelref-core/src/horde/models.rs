//! Typed views of the Horde API responses.
//!
//! The registry only consumes these shapes; every field the analysis does
//! not need is optional or defaulted so partial responses never fail to
//! parse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of the Horde a request concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HordeModelType {
    Image,
    Text,
}

impl HordeModelType {
    /// Value of the `type` query parameter.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            HordeModelType::Image => "image",
            HordeModelType::Text => "text",
        }
    }

    /// Path segment used by the stats endpoints.
    pub fn stats_path_segment(&self) -> &'static str {
        match self {
            HordeModelType::Image => "img",
            HordeModelType::Text => "text",
        }
    }
}

/// One entry of `GET /v2/status/models`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HordeModelStatus {
    #[serde(default)]
    pub name: String,
    /// Number of workers serving this model.
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub performance: Option<f64>,
    /// Queued work (pixelsteps for image, tokens for text).
    #[serde(default)]
    pub queued: Option<u64>,
    #[serde(default)]
    pub jobs: Option<u64>,
    #[serde(default)]
    pub eta: Option<i64>,
}

/// Response of `GET /v2/stats/{img,text}/models`: per-window usage maps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HordeModelStatsResponse {
    #[serde(default)]
    pub day: HashMap<String, u64>,
    #[serde(default)]
    pub month: HashMap<String, u64>,
    #[serde(default)]
    pub total: HashMap<String, u64>,
}

/// One entry of `GET /v2/workers`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HordeWorker {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Models this worker currently serves.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub performance: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub trusted: Option<bool>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

/// Usage counters for one model across the standard windows.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UsageStats {
    pub day: u64,
    pub month: u64,
    pub total: u64,
}

/// Compact description of a worker serving a model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub performance: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub uptime: u64,
}
