//! Per-model audit records and category summaries.
//!
//! Mirrors the handler-registry shape of the flags factory: ordered
//! handlers, first match wins. Each handler delegates flag computation to
//! an injectable `DeletionRiskFlagsFactory`, so custom risk rules slot in
//! without rewriting audit-info assembly.

use crate::audit::flags::DeletionRiskFlagsFactory;
use crate::audit::DeletionRiskFlags;
use crate::horde::CombinedModelStatistics;
use crate::models::{Category, ModelRecord};
use crate::{ModelRefError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Usage trend ratios comparing time windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageTrend {
    /// day / month. None when month usage is zero: the ratio is undefined,
    /// not zero.
    pub day_to_month_ratio: Option<f64>,
    /// month / total. None when total usage is zero.
    pub month_to_total_ratio: Option<f64>,
}

/// Read-only audit view of one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAuditInfo {
    pub name: String,
    pub category: Category,

    pub deletion_risk_flags: DeletionRiskFlags,
    /// Whether any risk flag is set.
    pub at_risk: bool,
    /// Number of risk flags set.
    pub risk_score: u32,

    pub worker_count: u32,
    pub usage_day: u64,
    pub usage_month: u64,
    pub usage_total: u64,
    /// Share of the category's monthly usage, 0 when the category total is 0.
    pub usage_percentage_of_category: f64,
    pub usage_trend: UsageTrend,

    /// Usage per GB (month usage / size). None without a positive size.
    pub cost_benefit_score: Option<f64>,
    pub size_gb: Option<f64>,

    pub baseline: Option<String>,
    pub nsfw: Option<bool>,
    pub has_description: bool,
    pub download_count: usize,
    pub download_hosts: Vec<String>,
}

impl ModelAuditInfo {
    /// Critical state: zero month usage AND zero active workers.
    ///
    /// Both conditions are required; a model with workers but no usage, or
    /// usage but no workers, is not critical.
    pub fn is_critical(&self) -> bool {
        self.deletion_risk_flags.zero_usage_month && self.deletion_risk_flags.no_active_workers
    }

    /// Warning state: any host- or download-related issue.
    pub fn has_warning(&self) -> bool {
        self.deletion_risk_flags.has_multiple_hosts
            || self.deletion_risk_flags.has_non_preferred_host
            || self.deletion_risk_flags.has_unknown_host
            || self.deletion_risk_flags.no_download_urls
    }
}

/// Aggregate statistics for a category audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryAuditSummary {
    pub total_models: usize,
    pub models_at_risk: usize,
    pub models_critical: usize,
    pub models_with_warnings: usize,

    pub models_with_zero_day_usage: usize,
    pub models_with_zero_month_usage: usize,
    pub models_with_zero_total_usage: usize,
    pub models_with_no_active_workers: usize,
    pub models_with_no_downloads: usize,
    pub models_with_non_preferred_hosts: usize,
    pub models_with_multiple_hosts: usize,
    pub models_with_low_usage: usize,

    /// Mean risk score; 0.0 for an empty model list.
    pub average_risk_score: f64,
    pub category_total_month_usage: u64,
}

impl CategoryAuditSummary {
    /// Aggregate a summary over a list of audit records.
    pub fn from_audit_models(models: &[ModelAuditInfo]) -> Self {
        let total_models = models.len();
        let flag = |predicate: fn(&ModelAuditInfo) -> bool| models.iter().filter(|m| predicate(m)).count();

        let total_risk: u32 = models.iter().map(|m| m.risk_score).sum();
        let average_risk_score = if total_models > 0 {
            total_risk as f64 / total_models as f64
        } else {
            0.0
        };

        Self {
            total_models,
            models_at_risk: flag(|m| m.at_risk),
            models_critical: flag(|m| m.is_critical()),
            models_with_warnings: flag(|m| m.has_warning()),
            models_with_zero_day_usage: flag(|m| m.deletion_risk_flags.zero_usage_day),
            models_with_zero_month_usage: flag(|m| m.deletion_risk_flags.zero_usage_month),
            models_with_zero_total_usage: flag(|m| m.deletion_risk_flags.zero_usage_total),
            models_with_no_active_workers: flag(|m| m.deletion_risk_flags.no_active_workers),
            models_with_no_downloads: flag(|m| m.deletion_risk_flags.no_download_urls),
            models_with_non_preferred_hosts: flag(|m| m.deletion_risk_flags.has_non_preferred_host),
            models_with_multiple_hosts: flag(|m| m.deletion_risk_flags.has_multiple_hosts),
            models_with_low_usage: flag(|m| m.deletion_risk_flags.low_usage),
            average_risk_score,
            category_total_month_usage: models.iter().map(|m| m.usage_month).sum(),
        }
    }
}

/// Complete audit response for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAuditResponse {
    pub category: Category,
    pub category_total_month_usage: u64,

    /// Models in the category before pagination or grouping.
    pub total_count: usize,
    /// Models actually returned.
    pub returned_count: usize,
    pub offset: usize,
    pub limit: Option<usize>,

    pub models: Vec<ModelAuditInfo>,
    pub summary: CategoryAuditSummary,
}

/// One assembly rule in the audit-info registry.
pub trait AuditInfoHandler: Send + Sync {
    fn can_handle(&self, category: Category, record: &ModelRecord) -> bool;

    fn create_info(
        &self,
        name: &str,
        category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        flags_factory: &DeletionRiskFlagsFactory,
    ) -> Result<ModelAuditInfo>;
}

/// Audit-info assembly scoped to one category, or to all when unscoped.
pub struct CategoryScopedAuditHandler {
    scope: Option<Category>,
}

impl CategoryScopedAuditHandler {
    pub fn scoped(category: Category) -> Self {
        Self {
            scope: Some(category),
        }
    }

    pub fn generic() -> Self {
        Self { scope: None }
    }
}

impl AuditInfoHandler for CategoryScopedAuditHandler {
    fn can_handle(&self, category: Category, _record: &ModelRecord) -> bool {
        self.scope.map_or(true, |scope| scope == category)
    }

    fn create_info(
        &self,
        name: &str,
        category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        flags_factory: &DeletionRiskFlagsFactory,
    ) -> Result<ModelAuditInfo> {
        let flags =
            flags_factory.create_flags(category, name, record, statistics, category_total_usage)?;

        let usage = statistics
            .and_then(|s| s.usage_stats.clone())
            .unwrap_or_default();
        let worker_count = statistics.map(|s| s.worker_count()).unwrap_or(0);

        let usage_percentage_of_category = if category_total_usage > 0 {
            (usage.month as f64 / category_total_usage as f64) * 100.0
        } else {
            0.0
        };

        let day_to_month_ratio = if usage.month > 0 {
            Some(usage.day as f64 / usage.month as f64)
        } else {
            None
        };
        let month_to_total_ratio = if usage.total > 0 {
            Some(usage.month as f64 / usage.total as f64)
        } else {
            None
        };

        let size_gb = record.size_gb();
        let cost_benefit_score = size_gb
            .filter(|size| *size > 0.0)
            .map(|size| usage.month as f64 / size);

        let mut download_hosts: Vec<String> = Vec::new();
        for download in record.downloads() {
            if let Some(url) = download.file_url.as_deref() {
                if let Ok(parsed) = Url::parse(url) {
                    if let Some(host) = parsed.host_str() {
                        if !download_hosts.iter().any(|h| h == host) {
                            download_hosts.push(host.to_string());
                        }
                    }
                }
            }
        }

        Ok(ModelAuditInfo {
            name: name.to_string(),
            category,
            at_risk: flags.any_flags(),
            risk_score: flags.flag_count(),
            deletion_risk_flags: flags,
            worker_count,
            usage_day: usage.day,
            usage_month: usage.month,
            usage_total: usage.total,
            usage_percentage_of_category,
            usage_trend: UsageTrend {
                day_to_month_ratio,
                month_to_total_ratio,
            },
            cost_benefit_score,
            size_gb,
            baseline: record.baseline.clone(),
            nsfw: record.nsfw,
            has_description: record.has_description(),
            download_count: record.downloads().len(),
            download_hosts,
        })
    }
}

/// Ordered registry of audit-info handlers.
pub struct ModelAuditInfoFactory {
    handlers: Vec<Box<dyn AuditInfoHandler>>,
    flags_factory: Arc<DeletionRiskFlagsFactory>,
}

impl ModelAuditInfoFactory {
    /// An empty factory over the given flags factory.
    pub fn new(flags_factory: Arc<DeletionRiskFlagsFactory>) -> Self {
        Self {
            handlers: Vec::new(),
            flags_factory,
        }
    }

    /// Default registry: image, text, then the generic fallback, over the
    /// default risk rules.
    pub fn create_default() -> Self {
        Self::with_flags_factory(Arc::new(DeletionRiskFlagsFactory::create_default()))
    }

    /// Default handler registry over custom risk rules.
    pub fn with_flags_factory(flags_factory: Arc<DeletionRiskFlagsFactory>) -> Self {
        let mut factory = Self::new(flags_factory);
        factory.register(Box::new(CategoryScopedAuditHandler::scoped(
            Category::ImageGeneration,
        )));
        factory.register(Box::new(CategoryScopedAuditHandler::scoped(
            Category::TextGeneration,
        )));
        factory.register(Box::new(CategoryScopedAuditHandler::generic()));
        factory
    }

    /// Append a handler. Dispatch is first-match in registration order.
    pub fn register(&mut self, handler: Box<dyn AuditInfoHandler>) {
        self.handlers.push(handler);
    }

    /// Build the audit record for one model.
    pub fn create_audit_info(
        &self,
        name: &str,
        category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
    ) -> Result<ModelAuditInfo> {
        for handler in &self.handlers {
            if handler.can_handle(category, record) {
                return handler.create_info(
                    name,
                    category,
                    record,
                    statistics,
                    category_total_usage,
                    &self.flags_factory,
                );
            }
        }
        Err(ModelRefError::NoHandler {
            category,
            model_name: name.to_string(),
        })
    }

    /// Audit every record, sorted by month usage descending.
    ///
    /// Models without a statistics entry are audited as "no data". The
    /// sort is stable, so records with equal usage keep their input order.
    pub fn analyze_models(
        &self,
        records: &[(String, ModelRecord)],
        statistics_by_name: &std::collections::HashMap<String, CombinedModelStatistics>,
        category_total_usage: u64,
        category: Category,
    ) -> Result<Vec<ModelAuditInfo>> {
        let mut audit_models = Vec::with_capacity(records.len());
        for (name, record) in records {
            let statistics = statistics_by_name.get(name);
            audit_models.push(self.create_audit_info(
                name,
                category,
                record,
                statistics,
                category_total_usage,
            )?);
        }

        audit_models.sort_by(|a, b| b.usage_month.cmp(&a.usage_month));

        info!(
            "Analyzed {} models for audit: {} at risk",
            audit_models.len(),
            audit_models.iter().filter(|m| m.at_risk).count()
        );

        Ok(audit_models)
    }

    /// Audit a category and wrap the result in a full response.
    pub fn create_audit_response(
        &self,
        records: &[(String, ModelRecord)],
        statistics_by_name: &std::collections::HashMap<String, CombinedModelStatistics>,
        category_total_usage: u64,
        category: Category,
    ) -> Result<CategoryAuditResponse> {
        let models = self.analyze_models(records, statistics_by_name, category_total_usage, category)?;
        let summary = CategoryAuditSummary::from_audit_models(&models);
        Ok(CategoryAuditResponse {
            category,
            category_total_month_usage: category_total_usage,
            total_count: models.len(),
            returned_count: models.len(),
            offset: 0,
            limit: None,
            models,
            summary,
        })
    }
}
