//! Per-PR and per-review metrics.
//!
//! Complexity is computed from PR-level metadata only (`changed_files`,
//! `additions + deletions`); file lists may be truncated and are used solely
//! for directory attribution.

use crate::config::WeightsConfig;
use crate::core_dirs::scaled_directory_churn;
use crate::errors::ImpactError;
use crate::model::{CoreDirectorySet, PullRequest, ReviewEvent};

pub fn ensure_non_negative(record: &str, field: &'static str, value: i64) -> Result<f64, ImpactError> {
    if value < 0 {
        return Err(ImpactError::DataIntegrity {
            record: record.to_string(),
            field,
            value,
        });
    }
    Ok(value as f64)
}

/// `log1p(changed_files) + complexity_churn * log1p(additions + deletions)`
pub fn pr_complexity(pr: &PullRequest, weights: &WeightsConfig) -> Result<f64, ImpactError> {
    let label = pr.label();
    let files = ensure_non_negative(&label, "changed_files", pr.changed_files)?;
    ensure_non_negative(&label, "additions", pr.additions)?;
    ensure_non_negative(&label, "deletions", pr.deletions)?;
    let churn = ensure_non_negative(&label, "churn", pr.churn())?;
    Ok(files.ln_1p() + weights.complexity_churn * churn.ln_1p())
}

/// `discussion * log1p(comments + threads)`
pub fn pr_discussion(pr: &PullRequest, weights: &WeightsConfig) -> Result<f64, ImpactError> {
    let label = pr.label();
    let comments = ensure_non_negative(&label, "comment_count", pr.comment_count)?;
    let threads = ensure_non_negative(&label, "thread_count", pr.thread_count)?;
    Ok(weights.discussion * (comments + threads).ln_1p())
}

pub fn pr_shipping(pr: &PullRequest, weights: &WeightsConfig) -> Result<f64, ImpactError> {
    Ok(pr_complexity(pr, weights)? + pr_discussion(pr, weights)?)
}

/// `complexity(pr) * (1 + review_comment * log1p(review_comment_count))`
pub fn review_points(
    pr: &PullRequest,
    review: &ReviewEvent,
    weights: &WeightsConfig,
) -> Result<f64, ImpactError> {
    let comments = ensure_non_negative(
        &review.label(),
        "review_comment_count",
        review.review_comment_count,
    )?;
    Ok(pr_complexity(pr, weights)? * (1.0 + weights.review_comment * comments.ln_1p()))
}

/// Scaled churn of one PR split into core and total.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoreTouch {
    pub core_churn: f64,
    pub total_churn: f64,
}

impl CoreTouch {
    /// In `[0, 1]`; zero when the PR carries no churn data.
    pub fn ratio(&self) -> f64 {
        if self.total_churn <= 0.0 {
            return 0.0;
        }
        (self.core_churn / self.total_churn).clamp(0.0, 1.0)
    }

    pub fn combine(self, other: CoreTouch) -> CoreTouch {
        CoreTouch {
            core_churn: self.core_churn + other.core_churn,
            total_churn: self.total_churn + other.total_churn,
        }
    }
}

pub fn pr_core_touch(
    pr: &PullRequest,
    core: &CoreDirectorySet,
    depth: usize,
) -> Result<CoreTouch, ImpactError> {
    let mut touch = CoreTouch::default();
    for (dir, churn) in scaled_directory_churn(pr, depth)? {
        touch.total_churn += churn;
        if core.contains(&dir) {
            touch.core_churn += churn;
        }
    }
    Ok(touch)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrMetrics {
    pub number: u64,
    pub complexity: f64,
    pub discussion: f64,
    pub shipping: f64,
    pub core_touch: CoreTouch,
}

pub fn compute_pr_metrics(
    pr: &PullRequest,
    core: &CoreDirectorySet,
    weights: &WeightsConfig,
    depth: usize,
) -> Result<PrMetrics, ImpactError> {
    let complexity = pr_complexity(pr, weights)?;
    let discussion = pr_discussion(pr, weights)?;
    Ok(PrMetrics {
        number: pr.number,
        complexity,
        discussion,
        shipping: complexity + discussion,
        core_touch: pr_core_touch(pr, core, depth)?,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        compute_pr_metrics, pr_complexity, pr_core_touch, pr_discussion, pr_shipping,
        review_points, CoreTouch,
    };
    use crate::config::AppConfig;
    use crate::errors::ImpactError;
    use crate::model::{CoreDirectorySet, PullRequest, ReviewEvent};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn pr(changed_files: i64, additions: i64, deletions: i64, comments: i64, threads: i64) -> PullRequest {
        PullRequest {
            number: 1,
            node_id: "node_1".to_string(),
            title: "PR 1".to_string(),
            url: String::new(),
            author: "alice".to_string(),
            merged_at: Utc
                .with_ymd_and_hms(2026, 3, 2, 12, 0, 0)
                .single()
                .expect("timestamp"),
            created_at: None,
            changed_files,
            additions,
            deletions,
            comment_count: comments,
            thread_count: threads,
            file_churn: BTreeMap::new(),
        }
    }

    fn review(comments: i64) -> ReviewEvent {
        ReviewEvent {
            pr_number: 1,
            reviewer: "bob".to_string(),
            state: "APPROVED".to_string(),
            submitted_at: Utc
                .with_ymd_and_hms(2026, 3, 2, 13, 0, 0)
                .single()
                .expect("timestamp"),
            review_comment_count: comments,
        }
    }

    #[test]
    fn shipping_matches_closed_form() {
        let weights = AppConfig::default().weights;
        let shipping = pr_shipping(&pr(1, 100, 50, 5, 3), &weights).expect("shipping");
        let expected = 1f64.ln_1p() + 0.6 * 150f64.ln_1p() + 0.3 * 8f64.ln_1p();
        assert!((shipping - expected).abs() < 1e-12);
    }

    #[test]
    fn complexity_ignores_truncated_file_list() {
        let weights = AppConfig::default().weights;
        let mut truncated = pr(50, 5000, 2000, 0, 0);
        truncated.file_churn.insert("a.py".to_string(), 15);
        let expected = 50f64.ln_1p() + 0.6 * 7000f64.ln_1p();
        assert!((pr_complexity(&truncated, &weights).expect("complexity") - expected).abs() < 1e-12);
    }

    #[test]
    fn shipping_is_monotonic_in_each_input() {
        let weights = AppConfig::default().weights;
        let base = pr_shipping(&pr(3, 40, 10, 2, 1), &weights).expect("base");
        for bumped in [
            pr(4, 40, 10, 2, 1),
            pr(3, 41, 10, 2, 1),
            pr(3, 40, 11, 2, 1),
            pr(3, 40, 10, 3, 1),
            pr(3, 40, 10, 2, 2),
        ] {
            assert!(pr_shipping(&bumped, &weights).expect("bumped") > base);
        }
    }

    #[test]
    fn review_points_scale_with_comment_count() {
        let weights = AppConfig::default().weights;
        let target = pr(2, 50, 50, 0, 0);
        let complexity = pr_complexity(&target, &weights).expect("complexity");
        let none = review_points(&target, &review(0), &weights).expect("points");
        let ten = review_points(&target, &review(10), &weights).expect("points");
        assert!((none - complexity).abs() < 1e-12);
        assert!((ten - complexity * (1.0 + 0.05 * 10f64.ln_1p())).abs() < 1e-12);
    }

    #[test]
    fn negative_counts_are_data_integrity_errors() {
        let weights = AppConfig::default().weights;
        let err = pr_shipping(&pr(1, 10, -3, 0, 0), &weights).expect_err("integrity");
        assert!(matches!(
            err,
            ImpactError::DataIntegrity {
                field: "deletions",
                value: -3,
                ..
            }
        ));
        let err = pr_discussion(&pr(1, 10, 3, -1, 0), &weights).expect_err("integrity");
        assert!(matches!(err, ImpactError::DataIntegrity { field: "comment_count", .. }));
        let err = review_points(&pr(1, 10, 3, 0, 0), &review(-2), &weights).expect_err("integrity");
        assert!(matches!(
            err,
            ImpactError::DataIntegrity {
                field: "review_comment_count",
                ..
            }
        ));
    }

    #[test]
    fn core_touch_ratio_uses_scaled_churn() {
        let core: CoreDirectorySet = ["frontend".to_string()].into_iter().collect();
        let mut mixed = pr(2, 400, 0, 0, 0);
        mixed.file_churn.insert("frontend/x.ts".to_string(), 150);
        mixed.file_churn.insert("docs/y.md".to_string(), 50);
        let touch = pr_core_touch(&mixed, &core, 1).expect("touch");
        assert!((touch.total_churn - 400.0).abs() < 1e-9);
        assert!((touch.ratio() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn core_touch_is_zero_without_file_data() {
        let core: CoreDirectorySet = ["frontend".to_string()].into_iter().collect();
        let metrics = compute_pr_metrics(
            &pr(2, 400, 0, 0, 0),
            &core,
            &AppConfig::default().weights,
            1,
        )
        .expect("metrics");
        assert_eq!(metrics.core_touch, CoreTouch::default());
        assert_eq!(metrics.core_touch.ratio(), 0.0);
    }
}
