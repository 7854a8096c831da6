use crate::aggregate::{score_engineers, ScoringWindow};
use crate::config::AppConfig;
use crate::core_dirs::compute_core_directories;
use crate::dedup::dedupe_reviews;
use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::model::{CoreDirectorySet, DirectoryChurnEntry, EngineerScore, PullRequest, ReviewEvent};
use crate::normalize::{normalize_records, NoiseFilter, SkippedRecord};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringReport {
    pub window: ScoringWindow,
    pub scores: Vec<EngineerScore>,
    pub core_directories: CoreDirectorySet,
    pub directory_churn: Vec<DirectoryChurnEntry>,
    pub pr_count: usize,
    pub review_count: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Scores already-normalized records: dedup, classify, aggregate.
pub fn score_records(
    prs: &[PullRequest],
    reviews: &[ReviewEvent],
    cfg: &AppConfig,
    window: ScoringWindow,
) -> Result<ScoringReport, ImpactError> {
    let reviews = dedupe_reviews(reviews);
    let (directory_churn, core_directories) = compute_core_directories(
        prs,
        cfg.classifier.directory_depth,
        cfg.classifier.core_coverage_threshold,
    )?;
    let scores = score_engineers(prs, &reviews, &core_directories, cfg, &window)?;
    Ok(ScoringReport {
        window,
        scores,
        core_directories,
        directory_churn,
        pr_count: prs.len(),
        review_count: reviews.len(),
        skipped: Vec::new(),
    })
}

/// Full run over raw fetch-layer payloads, as of `as_of`.
pub fn run_scoring(
    raw: &[Value],
    cfg: &AppConfig,
    as_of: DateTime<Utc>,
) -> Result<ScoringReport, ImpactError> {
    let window = ScoringWindow::ending_at(as_of, cfg.window.lookback_days);
    append_run_log(
        "info",
        "pipeline.started",
        json!({
            "raw_records": raw.len(),
            "window_start": window.start.to_rfc3339(),
            "window_end": window.end.to_rfc3339(),
            "exclude_noisy": cfg.noise.exclude_noisy
        }),
    );

    let noise = if cfg.noise.exclude_noisy {
        NoiseFilter::new(&cfg.noise.patterns)?
    } else {
        NoiseFilter::disabled()
    };
    let batch = normalize_records(raw, cfg.normalize.on_invalid, &noise)?;

    let prs = batch
        .pull_requests
        .into_iter()
        .filter(|pr| window.contains(pr.merged_at))
        .collect::<Vec<_>>();
    let reviews = batch
        .reviews
        .into_iter()
        .filter(|review| window.contains(review.submitted_at))
        .collect::<Vec<_>>();

    let mut report = score_records(&prs, &reviews, cfg, window)?;
    report.skipped = batch.skipped;

    append_run_log(
        "info",
        "pipeline.completed",
        json!({
            "pull_requests": report.pr_count,
            "reviews": report.review_count,
            "skipped": report.skipped.len(),
            "engineers": report.scores.len(),
            "core_directories": report.core_directories.len()
        }),
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::run_scoring;
    use crate::config::{AppConfig, InvalidRecordPolicy};
    use crate::errors::ImpactError;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{json, Value};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0)
            .single()
            .expect("timestamp")
    }

    fn raw(number: u64, author: &str, merged_at: &str, files: Value) -> Value {
        json!({
            "number": number,
            "author": {"login": author},
            "mergedAt": merged_at,
            "changedFiles": 2,
            "additions": 120,
            "deletions": 30,
            "comments": {"totalCount": 1},
            "reviewThreads": {"totalCount": 0},
            "reviews": {"nodes": []},
            "_files": files
        })
    }

    #[test]
    fn records_outside_window_are_excluded() {
        let input = vec![
            raw(1, "alice", "2026-03-20T10:00:00Z", json!([])),
            raw(2, "bob", "2025-01-01T10:00:00Z", json!([])),
        ];
        let report = run_scoring(&input, &AppConfig::default(), as_of()).expect("report");
        assert_eq!(report.pr_count, 1);
        assert_eq!(report.scores.len(), 1);
        assert_eq!(report.scores[0].login, "alice");
    }

    #[test]
    fn noisy_toggle_changes_core_attribution() {
        let files = json!([
            {"path": "frontend/app.tsx", "additions": 10, "deletions": 0},
            {"path": "pnpm-lock.yaml", "additions": 140, "deletions": 0}
        ]);
        let input = vec![raw(1, "alice", "2026-03-20T10:00:00Z", files)];

        let filtered = run_scoring(&input, &AppConfig::default(), as_of()).expect("filtered");
        assert!(filtered.core_directories.contains("frontend"));
        assert!(!filtered.core_directories.contains("."));

        let mut cfg = AppConfig::default();
        cfg.noise.exclude_noisy = false;
        let unfiltered = run_scoring(&input, &cfg, as_of()).expect("unfiltered");
        assert!(unfiltered.core_directories.contains("."));
    }

    #[test]
    fn negative_churn_is_fatal_even_under_skip_policy() {
        let mut bad = raw(1, "alice", "2026-03-20T10:00:00Z", json!([]));
        bad["additions"] = json!(-5);
        let mut cfg = AppConfig::default();
        cfg.normalize.on_invalid = InvalidRecordPolicy::Skip;
        let err = run_scoring(&[bad], &cfg, as_of()).expect_err("integrity");
        assert!(matches!(err, ImpactError::DataIntegrity { .. }));
    }

    #[test]
    fn skipped_records_are_reported() {
        let mut bad = raw(2, "bob", "2026-03-20T10:00:00Z", json!([]));
        bad.as_object_mut().expect("object").remove("deletions");
        let input = vec![raw(1, "alice", "2026-03-20T10:00:00Z", json!([])), bad];
        let report = run_scoring(&input, &AppConfig::default(), as_of()).expect("report");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.pr_count, 1);
    }

    #[test]
    fn empty_input_yields_empty_report() {
        let report = run_scoring(&[], &AppConfig::default(), as_of()).expect("report");
        assert!(report.scores.is_empty());
        assert!(report.core_directories.is_empty());
    }
}
