//! Grouping of text model quantization variants.
//!
//! The Horde reports every quantization of a text model separately. For
//! review purposes those variants collapse into one synthetic entry per
//! base model: usage counters sum, worker count takes the max across
//! variants, sizes average, and risk flags OR-merge.

use crate::audit::info::{CategoryAuditResponse, CategoryAuditSummary, ModelAuditInfo, UsageTrend};
use crate::audit::name_parser::get_base_model_name;
use crate::audit::DeletionRiskFlags;
use crate::models::Category;
use tracing::{debug, info};

/// OR-merge risk flags across variants: a risk on any variant is a risk on
/// the group.
pub fn merge_deletion_flags(flags: &[&DeletionRiskFlags]) -> DeletionRiskFlags {
    DeletionRiskFlags {
        zero_usage_day: flags.iter().any(|f| f.zero_usage_day),
        zero_usage_month: flags.iter().any(|f| f.zero_usage_month),
        zero_usage_total: flags.iter().any(|f| f.zero_usage_total),
        no_active_workers: flags.iter().any(|f| f.no_active_workers),
        has_multiple_hosts: flags.iter().any(|f| f.has_multiple_hosts),
        has_non_preferred_host: flags.iter().any(|f| f.has_non_preferred_host),
        has_unknown_host: flags.iter().any(|f| f.has_unknown_host),
        no_download_urls: flags.iter().any(|f| f.no_download_urls),
        missing_description: flags.iter().any(|f| f.missing_description),
        missing_baseline: flags.iter().any(|f| f.missing_baseline),
        low_usage: flags.iter().any(|f| f.low_usage),
    }
}

/// Weighted-average merge of usage trends; weightless or zero-weight input
/// yields an empty trend.
pub fn merge_usage_trends(trends: &[&UsageTrend], weights: &[u64]) -> UsageTrend {
    let total_weight: u64 = weights.iter().sum();
    if trends.is_empty() || total_weight == 0 {
        return UsageTrend::default();
    }

    let weighted = |pick: fn(&UsageTrend) -> Option<f64>| -> Option<f64> {
        let contributions: Vec<f64> = trends
            .iter()
            .zip(weights.iter())
            .filter_map(|(trend, weight)| pick(trend).map(|ratio| ratio * *weight as f64))
            .collect();
        if contributions.is_empty() {
            None
        } else {
            Some(contributions.iter().sum::<f64>() / total_weight as f64)
        }
    };

    UsageTrend {
        day_to_month_ratio: weighted(|t| t.day_to_month_ratio),
        month_to_total_ratio: weighted(|t| t.month_to_total_ratio),
    }
}

/// Collapse quantization variants into one entry per base model.
pub fn group_audit_models(models: Vec<ModelAuditInfo>) -> Vec<ModelAuditInfo> {
    if models.is_empty() {
        return Vec::new();
    }

    let mut grouped: Vec<(String, Vec<ModelAuditInfo>)> = Vec::new();
    for model in models {
        let base_name = get_base_model_name(&model.name);
        match grouped.iter_mut().find(|(name, _)| *name == base_name) {
            Some((_, variants)) => variants.push(model),
            None => grouped.push((base_name, vec![model])),
        }
    }

    let total_groups = grouped.len();
    let result: Vec<ModelAuditInfo> = grouped
        .into_iter()
        .map(|(base_name, variants)| {
            if variants.len() == 1 {
                return variants.into_iter().next().expect("non-empty group");
            }

            debug!("Grouping {} variants of '{}'", variants.len(), base_name);

            let usage_day: u64 = variants.iter().map(|v| v.usage_day).sum();
            let usage_month: u64 = variants.iter().map(|v| v.usage_month).sum();
            let usage_total: u64 = variants.iter().map(|v| v.usage_total).sum();
            let worker_count = variants.iter().map(|v| v.worker_count).max().unwrap_or(0);

            let sizes: Vec<f64> = variants.iter().filter_map(|v| v.size_gb).collect();
            let size_gb = if sizes.is_empty() {
                None
            } else {
                Some(sizes.iter().sum::<f64>() / sizes.len() as f64)
            };

            let flags: Vec<&DeletionRiskFlags> =
                variants.iter().map(|v| &v.deletion_risk_flags).collect();
            let merged_flags = merge_deletion_flags(&flags);

            let trends: Vec<&UsageTrend> = variants.iter().map(|v| &v.usage_trend).collect();
            let weights: Vec<u64> = variants.iter().map(|v| v.usage_month).collect();
            let merged_trend = merge_usage_trends(&trends, &weights);

            let mut download_hosts: Vec<String> = Vec::new();
            for variant in &variants {
                for host in &variant.download_hosts {
                    if !download_hosts.iter().any(|h| h == host) {
                        download_hosts.push(host.clone());
                    }
                }
            }

            let usage_percentage_of_category: f64 = variants
                .iter()
                .map(|v| v.usage_percentage_of_category)
                .sum();

            let cost_benefit_score = size_gb
                .filter(|size| *size > 0.0)
                .map(|size| usage_month as f64 / size);

            let first = &variants[0];
            ModelAuditInfo {
                name: format!("{} (grouped)", base_name),
                category: first.category,
                at_risk: merged_flags.any_flags(),
                risk_score: merged_flags.flag_count(),
                worker_count,
                usage_day,
                usage_month,
                usage_total,
                usage_percentage_of_category,
                usage_trend: merged_trend,
                cost_benefit_score,
                size_gb,
                baseline: first.baseline.clone(),
                nsfw: first.nsfw,
                has_description: variants.iter().all(|v| v.has_description),
                download_count: variants.iter().map(|v| v.download_count).sum(),
                download_hosts,
                deletion_risk_flags: merged_flags,
            }
        })
        .collect();

    info!("Grouped models into {} entries", total_groups);
    result
}

/// Apply variant grouping to a text-category audit response.
///
/// Non-text categories pass through untouched. `total_count` keeps the
/// ungrouped model count; `returned_count` reflects the grouped list.
pub fn apply_grouping_to_audit(response: CategoryAuditResponse) -> CategoryAuditResponse {
    if response.category != Category::TextGeneration {
        debug!("Skipping grouping for non-text category: {}", response.category);
        return response;
    }

    let total_count = response.total_count;
    let category_total = response.category_total_month_usage;
    let grouped = group_audit_models(response.models);
    let mut summary = CategoryAuditSummary::from_audit_models(&grouped);
    summary.category_total_month_usage = category_total;

    CategoryAuditResponse {
        category: response.category,
        category_total_month_usage: category_total,
        total_count,
        returned_count: grouped.len(),
        offset: response.offset,
        limit: response.limit,
        models: grouped,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, month: u64, workers: u32, size_gb: Option<f64>) -> ModelAuditInfo {
        let flags = DeletionRiskFlags::default();
        ModelAuditInfo {
            name: name.to_string(),
            category: Category::TextGeneration,
            at_risk: flags.any_flags(),
            risk_score: flags.flag_count(),
            deletion_risk_flags: flags,
            worker_count: workers,
            usage_day: month / 30,
            usage_month: month,
            usage_total: month * 10,
            usage_percentage_of_category: 0.0,
            usage_trend: UsageTrend::default(),
            cost_benefit_score: None,
            size_gb,
            baseline: Some("llama".to_string()),
            nsfw: Some(false),
            has_description: true,
            download_count: 1,
            download_hosts: vec!["huggingface.co".to_string()],
        }
    }

    #[test]
    fn test_variants_merge_into_one_entry() {
        let models = vec![
            variant("Mistral-7B-Instruct-Q4", 300, 2, Some(4.0)),
            variant("Mistral-7B-Instruct-Q8", 100, 5, Some(8.0)),
            variant("GPT-4", 1000, 1, None),
        ];

        let grouped = group_audit_models(models);
        assert_eq!(grouped.len(), 2);

        let merged = grouped
            .iter()
            .find(|m| m.name.contains("(grouped)"))
            .unwrap();
        assert_eq!(merged.usage_month, 400);
        // Max across variants, not sum: the same workers serve both quants
        assert_eq!(merged.worker_count, 5);
        assert_eq!(merged.size_gb, Some(6.0));
        assert_eq!(merged.download_count, 2);
    }

    #[test]
    fn test_flags_or_merge() {
        let mut risky = variant("Mistral-7B-Q4", 0, 0, None);
        risky.deletion_risk_flags.zero_usage_month = true;
        risky.deletion_risk_flags.no_active_workers = true;
        let healthy = variant("Mistral-7B-Q8", 500, 3, None);

        let flags = merge_deletion_flags(&[&risky.deletion_risk_flags, &healthy.deletion_risk_flags]);
        assert!(flags.zero_usage_month);
        assert!(flags.no_active_workers);
        assert!(!flags.missing_description);
    }

    #[test]
    fn test_trend_merge_is_usage_weighted() {
        let high = UsageTrend {
            day_to_month_ratio: Some(0.5),
            month_to_total_ratio: None,
        };
        let low = UsageTrend {
            day_to_month_ratio: Some(0.1),
            month_to_total_ratio: None,
        };

        let merged = merge_usage_trends(&[&high, &low], &[900, 100]);
        // (0.5*900 + 0.1*100) / 1000 = 0.46
        assert!((merged.day_to_month_ratio.unwrap() - 0.46).abs() < 1e-9);
        assert!(merged.month_to_total_ratio.is_none());
    }

    #[test]
    fn test_zero_weight_trend_merge_is_empty() {
        let trend = UsageTrend {
            day_to_month_ratio: Some(0.5),
            month_to_total_ratio: Some(0.2),
        };
        let merged = merge_usage_trends(&[&trend], &[0]);
        assert!(merged.day_to_month_ratio.is_none());
    }

    #[test]
    fn test_apply_grouping_preserves_total_count() {
        let models = vec![
            variant("Mistral-7B-Instruct-Q4", 300, 2, None),
            variant("Mistral-7B-Instruct-Q8", 100, 5, None),
        ];
        let summary = CategoryAuditSummary::from_audit_models(&models);
        let response = CategoryAuditResponse {
            category: Category::TextGeneration,
            category_total_month_usage: 400,
            total_count: 2,
            returned_count: 2,
            offset: 0,
            limit: None,
            models,
            summary,
        };

        let grouped = apply_grouping_to_audit(response);
        assert_eq!(grouped.total_count, 2);
        assert_eq!(grouped.returned_count, 1);
        assert_eq!(grouped.category_total_month_usage, 400);
        assert_eq!(grouped.summary.total_models, 1);
    }

    #[test]
    fn test_non_text_category_passes_through() {
        let models = vec![ModelAuditInfo {
            category: Category::ImageGeneration,
            ..variant("Deliberate", 100, 1, None)
        }];
        let summary = CategoryAuditSummary::from_audit_models(&models);
        let response = CategoryAuditResponse {
            category: Category::ImageGeneration,
            category_total_month_usage: 100,
            total_count: 1,
            returned_count: 1,
            offset: 0,
            limit: None,
            models,
            summary,
        };

        let untouched = apply_grouping_to_audit(response);
        assert_eq!(untouched.returned_count, 1);
        assert_eq!(untouched.models[0].name, "Deliberate");
    }
}
