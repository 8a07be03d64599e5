//! Deletion-risk flag computation.
//!
//! A registry of handlers evaluates each model record against a fixed set
//! of independent risk signals. Dispatch is first-match in registration
//! order, which makes that order part of the factory's contract:
//! category-specific handlers must be registered before the generic
//! fallback or they never fire.

use crate::config::AuditSettings;
use crate::horde::CombinedModelStatistics;
use crate::models::{Category, ModelRecord};
use crate::{ModelRefError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Independent boolean risk signals for one model.
///
/// Derived, never persisted; recomputed per audit request from current
/// statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionRiskFlags {
    /// No usage in the past day.
    #[serde(default)]
    pub zero_usage_day: bool,
    /// No usage in the past month.
    #[serde(default)]
    pub zero_usage_month: bool,
    /// No usage all-time.
    #[serde(default)]
    pub zero_usage_total: bool,
    /// Zero active workers.
    #[serde(default)]
    pub no_active_workers: bool,
    /// Downloads spread across multiple file hosts.
    #[serde(default)]
    pub has_multiple_hosts: bool,
    /// Hosted somewhere outside the preferred-host allowlist.
    #[serde(default)]
    pub has_non_preferred_host: bool,
    /// A download URL failed to parse or has no host.
    #[serde(default)]
    pub has_unknown_host: bool,
    /// Empty download list or no valid download URL.
    #[serde(default)]
    pub no_download_urls: bool,
    /// Description absent or blank.
    #[serde(default)]
    pub missing_description: bool,
    /// Baseline absent, where the category carries one.
    #[serde(default)]
    pub missing_baseline: bool,
    /// Month usage below the configured share of category usage.
    #[serde(default)]
    pub low_usage: bool,
}

impl DeletionRiskFlags {
    fn as_array(&self) -> [bool; 11] {
        [
            self.zero_usage_day,
            self.zero_usage_month,
            self.zero_usage_total,
            self.no_active_workers,
            self.has_multiple_hosts,
            self.has_non_preferred_host,
            self.has_unknown_host,
            self.no_download_urls,
            self.missing_description,
            self.missing_baseline,
            self.low_usage,
        ]
    }

    /// Whether any risk signal is set.
    pub fn any_flags(&self) -> bool {
        self.as_array().into_iter().any(|flag| flag)
    }

    /// Number of risk signals set; used as the risk score.
    pub fn flag_count(&self) -> u32 {
        self.as_array().into_iter().filter(|flag| *flag).count() as u32
    }
}

/// Analyze a record's download URLs and set host-related flags.
fn analyze_download_hosts(record: &ModelRecord, settings: &AuditSettings, flags: &mut DeletionRiskFlags) {
    let downloads = record.downloads();
    if downloads.is_empty() {
        flags.no_download_urls = true;
        return;
    }

    let mut unique_hosts: Vec<String> = Vec::new();
    let mut has_valid_url = false;
    let mut has_preferred_host = false;

    for download in downloads {
        let Some(url) = download.file_url.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        match Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => {
                    has_valid_url = true;
                    if !unique_hosts.iter().any(|h| h == host) {
                        unique_hosts.push(host.to_string());
                    }
                    if settings
                        .preferred_file_hosts
                        .iter()
                        .any(|preferred| host.contains(preferred.as_str()))
                    {
                        has_preferred_host = true;
                    }
                }
                None => flags.has_unknown_host = true,
            },
            Err(_) => flags.has_unknown_host = true,
        }
    }

    if !has_valid_url {
        flags.no_download_urls = true;
    }
    if unique_hosts.len() > 1 {
        flags.has_multiple_hosts = true;
    }
    if has_valid_url && !has_preferred_host {
        flags.has_non_preferred_host = true;
    }
}

/// Set usage- and worker-derived flags from live statistics.
///
/// A statistics entry with no usage data reads as zero usage: missing data
/// defaults toward at-risk.
fn analyze_statistics(
    statistics: &CombinedModelStatistics,
    category_total_usage: u64,
    settings: &AuditSettings,
    flags: &mut DeletionRiskFlags,
) {
    if statistics.worker_count() == 0 {
        flags.no_active_workers = true;
    }

    let usage = statistics.usage_stats.clone().unwrap_or_default();
    flags.zero_usage_day = usage.day == 0;
    flags.zero_usage_month = usage.month == 0;
    flags.zero_usage_total = usage.total == 0;

    // No meaningful "low" exists when the whole category has no usage
    if category_total_usage > 0 {
        let usage_percentage = (usage.month as f64 / category_total_usage as f64) * 100.0;
        if usage_percentage < settings.low_usage_threshold_percent {
            flags.low_usage = true;
        }
    }
}

fn common_flags(
    record: &ModelRecord,
    statistics: Option<&CombinedModelStatistics>,
    category_total_usage: u64,
    settings: &AuditSettings,
) -> DeletionRiskFlags {
    let mut flags = DeletionRiskFlags::default();

    analyze_download_hosts(record, settings, &mut flags);

    if !record.has_description() {
        flags.missing_description = true;
    }

    if let Some(statistics) = statistics {
        analyze_statistics(statistics, category_total_usage, settings, &mut flags);
    }

    flags
}

/// One rule set in the deletion-risk registry.
pub trait DeletionRiskHandler: Send + Sync {
    /// Whether this handler processes the given record.
    fn can_handle(&self, category: Category, record: &ModelRecord) -> bool;

    /// Compute the flags for a record this handler accepted.
    fn create_flags(
        &self,
        category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        settings: &AuditSettings,
    ) -> DeletionRiskFlags;
}

/// Rules for image generation models: common rules plus baseline presence.
pub struct ImageGenerationRiskHandler;

impl DeletionRiskHandler for ImageGenerationRiskHandler {
    fn can_handle(&self, category: Category, _record: &ModelRecord) -> bool {
        category == Category::ImageGeneration
    }

    fn create_flags(
        &self,
        _category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        settings: &AuditSettings,
    ) -> DeletionRiskFlags {
        let mut flags = common_flags(record, statistics, category_total_usage, settings);
        if record.baseline.as_deref().map(str::is_empty).unwrap_or(true) {
            flags.missing_baseline = true;
        }
        flags
    }
}

/// Rules for text generation models: common rules plus baseline presence.
pub struct TextGenerationRiskHandler;

impl DeletionRiskHandler for TextGenerationRiskHandler {
    fn can_handle(&self, category: Category, _record: &ModelRecord) -> bool {
        category == Category::TextGeneration
    }

    fn create_flags(
        &self,
        _category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        settings: &AuditSettings,
    ) -> DeletionRiskFlags {
        let mut flags = common_flags(record, statistics, category_total_usage, settings);
        if record.baseline.as_deref().map(str::is_empty).unwrap_or(true) {
            flags.missing_baseline = true;
        }
        flags
    }
}

/// Fallback rules applied to every other category.
pub struct GenericRiskHandler;

impl DeletionRiskHandler for GenericRiskHandler {
    fn can_handle(&self, _category: Category, _record: &ModelRecord) -> bool {
        true
    }

    fn create_flags(
        &self,
        _category: Category,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
        settings: &AuditSettings,
    ) -> DeletionRiskFlags {
        common_flags(record, statistics, category_total_usage, settings)
    }
}

/// Ordered registry of deletion-risk handlers.
pub struct DeletionRiskFlagsFactory {
    handlers: Vec<Box<dyn DeletionRiskHandler>>,
    settings: AuditSettings,
}

impl DeletionRiskFlagsFactory {
    /// An empty factory; register handlers in dispatch order.
    pub fn new(settings: AuditSettings) -> Self {
        Self {
            handlers: Vec::new(),
            settings,
        }
    }

    /// The default registry: image, then text, then the generic fallback.
    pub fn create_default() -> Self {
        Self::create_default_with_settings(AuditSettings::default())
    }

    /// The default registry with explicit settings.
    pub fn create_default_with_settings(settings: AuditSettings) -> Self {
        let mut factory = Self::new(settings);
        factory.register(Box::new(ImageGenerationRiskHandler));
        factory.register(Box::new(TextGenerationRiskHandler));
        factory.register(Box::new(GenericRiskHandler));
        factory
    }

    /// Append a handler. Dispatch is first-match in registration order.
    pub fn register(&mut self, handler: Box<dyn DeletionRiskHandler>) {
        self.handlers.push(handler);
    }

    /// The thresholds and allowlists this factory evaluates against.
    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    /// Compute flags for a record via the first handler that accepts it.
    ///
    /// No accepting handler is a configuration error, not a data
    /// condition.
    pub fn create_flags(
        &self,
        category: Category,
        model_name: &str,
        record: &ModelRecord,
        statistics: Option<&CombinedModelStatistics>,
        category_total_usage: u64,
    ) -> Result<DeletionRiskFlags> {
        for handler in &self.handlers {
            if handler.can_handle(category, record) {
                return Ok(handler.create_flags(
                    category,
                    record,
                    statistics,
                    category_total_usage,
                    &self.settings,
                ));
            }
        }
        Err(ModelRefError::NoHandler {
            category,
            model_name: model_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horde::UsageStats;
    use crate::models::{DownloadConfig, DownloadRecord};

    fn record_with_urls(urls: &[&str]) -> ModelRecord {
        ModelRecord {
            description: Some("a model".to_string()),
            baseline: Some("stable_diffusion_1".to_string()),
            config: Some(DownloadConfig {
                download: urls
                    .iter()
                    .map(|url| DownloadRecord {
                        file_name: Some("weights.safetensors".to_string()),
                        file_url: Some(url.to_string()),
                        sha256sum: None,
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    fn stats(day: u64, month: u64, total: u64, workers: u32) -> CombinedModelStatistics {
        CombinedModelStatistics {
            usage_stats: Some(UsageStats { day, month, total }),
            worker_count_from_status: Some(workers),
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_model_has_no_flags() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let record = record_with_urls(&["https://huggingface.co/org/model/file.safetensors"]);
        let statistics = stats(100, 5000, 90000, 50);

        let flags = factory
            .create_flags(
                Category::ImageGeneration,
                "Deliberate",
                &record,
                Some(&statistics),
                10000,
            )
            .unwrap();

        assert!(!flags.any_flags(), "unexpected flags: {:?}", flags);
        assert_eq!(flags.flag_count(), 0);
    }

    #[test]
    fn test_abandoned_model_flags() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let record = ModelRecord::default();
        let statistics = stats(0, 0, 0, 0);

        let flags = factory
            .create_flags(Category::ImageGeneration, "Ghost", &record, Some(&statistics), 10000)
            .unwrap();

        assert!(flags.no_download_urls);
        assert!(flags.zero_usage_day);
        assert!(flags.zero_usage_month);
        assert!(flags.zero_usage_total);
        assert!(flags.no_active_workers);
        assert!(flags.missing_description);
        assert!(flags.missing_baseline);
        assert!(flags.flag_count() > 3);
    }

    #[test]
    fn test_low_usage_threshold_boundary() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let record = record_with_urls(&["https://huggingface.co/org/model/file.safetensors"]);

        // 9 / 10000 = 0.09% < 0.1%
        let below = factory
            .create_flags(
                Category::ImageGeneration,
                "m",
                &record,
                Some(&stats(1, 9, 100, 5)),
                10000,
            )
            .unwrap();
        assert!(below.low_usage);

        // 11 / 10000 = 0.11% >= 0.1%
        let above = factory
            .create_flags(
                Category::ImageGeneration,
                "m",
                &record,
                Some(&stats(1, 11, 100, 5)),
                10000,
            )
            .unwrap();
        assert!(!above.low_usage);

        // Division guard: zero category total never flags low usage
        let guarded = factory
            .create_flags(
                Category::ImageGeneration,
                "m",
                &record,
                Some(&stats(0, 0, 0, 5)),
                0,
            )
            .unwrap();
        assert!(!guarded.low_usage);
    }

    #[test]
    fn test_host_analysis() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let statistics = stats(10, 100, 1000, 5);

        let multiple = record_with_urls(&[
            "https://huggingface.co/a/file.safetensors",
            "https://example.com/b/file.safetensors",
        ]);
        let flags = factory
            .create_flags(Category::ImageGeneration, "m", &multiple, Some(&statistics), 100)
            .unwrap();
        assert!(flags.has_multiple_hosts);
        // A preferred host is present, so the allowlist flag stays off
        assert!(!flags.has_non_preferred_host);

        let foreign = record_with_urls(&["https://example.com/b/file.safetensors"]);
        let flags = factory
            .create_flags(Category::ImageGeneration, "m", &foreign, Some(&statistics), 100)
            .unwrap();
        assert!(flags.has_non_preferred_host);
        assert!(!flags.has_multiple_hosts);

        let broken = record_with_urls(&["not a url at all"]);
        let flags = factory
            .create_flags(Category::ImageGeneration, "m", &broken, Some(&statistics), 100)
            .unwrap();
        assert!(flags.has_unknown_host);
        assert!(flags.no_download_urls);
    }

    #[test]
    fn test_missing_statistics_sets_no_usage_flags() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let record = record_with_urls(&["https://huggingface.co/a/file.safetensors"]);

        let flags = factory
            .create_flags(Category::Esrgan, "upscaler", &record, None, 0)
            .unwrap();

        assert!(!flags.zero_usage_day);
        assert!(!flags.no_active_workers);
        assert!(!flags.low_usage);
    }

    #[test]
    fn test_statistics_without_usage_data_reads_as_zero() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let record = record_with_urls(&["https://huggingface.co/a/file.safetensors"]);
        let statistics = CombinedModelStatistics::default();

        let flags = factory
            .create_flags(Category::Esrgan, "upscaler", &record, Some(&statistics), 100)
            .unwrap();

        assert!(flags.zero_usage_day);
        assert!(flags.zero_usage_month);
        assert!(flags.zero_usage_total);
        assert!(flags.no_active_workers);
    }

    #[test]
    fn test_baseline_only_flagged_for_applicable_categories() {
        let factory = DeletionRiskFlagsFactory::create_default();
        let mut record = record_with_urls(&["https://huggingface.co/a/file.safetensors"]);
        record.baseline = None;

        let image = factory
            .create_flags(Category::ImageGeneration, "m", &record, None, 0)
            .unwrap();
        assert!(image.missing_baseline);

        let text = factory
            .create_flags(Category::TextGeneration, "m", &record, None, 0)
            .unwrap();
        assert!(text.missing_baseline);

        let esrgan = factory
            .create_flags(Category::Esrgan, "m", &record, None, 0)
            .unwrap();
        assert!(!esrgan.missing_baseline);
    }

    #[test]
    fn test_registration_order_is_the_dispatch_contract() {
        // Registering the generic fallback first starves the image handler
        let mut shadowed = DeletionRiskFlagsFactory::new(AuditSettings::default());
        shadowed.register(Box::new(GenericRiskHandler));
        shadowed.register(Box::new(ImageGenerationRiskHandler));

        let mut record = record_with_urls(&["https://huggingface.co/a/file.safetensors"]);
        record.baseline = None;

        let flags = shadowed
            .create_flags(Category::ImageGeneration, "m", &record, None, 0)
            .unwrap();
        // The generic handler won, so the baseline rule never ran
        assert!(!flags.missing_baseline);
    }

    #[test]
    fn test_empty_factory_is_a_configuration_error() {
        let factory = DeletionRiskFlagsFactory::new(AuditSettings::default());
        let result = factory.create_flags(
            Category::Clip,
            "ViT-L/14",
            &ModelRecord::default(),
            None,
            0,
        );
        assert!(matches!(result, Err(ModelRefError::NoHandler { .. })));
    }
}
