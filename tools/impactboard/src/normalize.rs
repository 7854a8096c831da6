use crate::config::InvalidRecordPolicy;
use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::model::{PullRequest, ReviewEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const GHOST_LOGIN: &str = "ghost";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawActor {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCount {
    #[serde(rename = "totalCount")]
    pub total_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReview {
    pub author: Option<RawActor>,
    pub state: Option<String>,
    #[serde(rename = "submittedAt")]
    pub submitted_at: Option<String>,
    pub comments: Option<RawCount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReviewConnection {
    pub nodes: Option<Vec<RawReview>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFile {
    pub path: Option<String>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
}

/// One merged PR as produced by the fetch layer (GraphQL field names).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPullRequest {
    pub id: Option<String>,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<RawActor>,
    #[serde(rename = "mergedAt")]
    pub merged_at: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "changedFiles")]
    pub changed_files: Option<i64>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
    pub comments: Option<RawCount>,
    #[serde(rename = "reviewThreads")]
    pub review_threads: Option<RawCount>,
    pub reviews: Option<RawReviewConnection>,
    #[serde(rename = "_files")]
    pub files: Option<Vec<RawFile>>,
}

/// Glob-based filter for lockfiles, snapshots and generated output.
#[derive(Debug, Clone, Default)]
pub struct NoiseFilter {
    patterns: Vec<glob::Pattern>,
}

impl NoiseFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ImpactError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    ImpactError::InvalidConfig(format!("invalid noise pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Matches either the full path or its basename.
    pub fn is_noisy(&self, path: &str) -> bool {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.patterns
            .iter()
            .any(|p| p.matches(path) || p.matches(basename))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub pull_requests: Vec<PullRequest>,
    pub reviews: Vec<ReviewEvent>,
    pub skipped: Vec<SkippedRecord>,
}

pub fn normalize_records(
    raw: &[Value],
    policy: InvalidRecordPolicy,
    noise: &NoiseFilter,
) -> Result<NormalizedBatch, ImpactError> {
    let mut batch = NormalizedBatch::default();
    let mut noisy_files = 0usize;

    for (index, value) in raw.iter().enumerate() {
        let outcome = serde_json::from_value::<RawPullRequest>(value.clone())
            .map_err(|e| ImpactError::validation(record_label_from_value(value, index), e.to_string()))
            .and_then(|record| normalize_pull_request(&record, index, noise));

        match outcome {
            Ok(normalized) => {
                noisy_files += normalized.noisy_files;
                batch.pull_requests.push(normalized.pull_request);
                batch.reviews.extend(normalized.reviews);
            }
            Err(ImpactError::Validation { record, reason }) if policy == InvalidRecordPolicy::Skip => {
                append_run_log(
                    "warn",
                    "normalize.record.skipped",
                    json!({
                        "record": record,
                        "reason": reason
                    }),
                );
                batch.skipped.push(SkippedRecord { record, reason });
            }
            Err(err) => {
                append_run_log(
                    "error",
                    "normalize.record.rejected",
                    json!({
                        "index": index,
                        "error": err.to_string()
                    }),
                );
                return Err(err);
            }
        }
    }

    append_run_log(
        "info",
        "normalize.completed",
        json!({
            "input_records": raw.len(),
            "pull_requests": batch.pull_requests.len(),
            "reviews": batch.reviews.len(),
            "skipped": batch.skipped.len(),
            "noisy_files_dropped": noisy_files
        }),
    );
    Ok(batch)
}

pub struct NormalizedPullRequest {
    pub pull_request: PullRequest,
    pub reviews: Vec<ReviewEvent>,
    pub noisy_files: usize,
}

pub fn normalize_pull_request(
    raw: &RawPullRequest,
    index: usize,
    noise: &NoiseFilter,
) -> Result<NormalizedPullRequest, ImpactError> {
    let label = raw
        .number
        .map(|n| format!("PR #{n}"))
        .unwrap_or_else(|| format!("record[{index}]"));

    let number = raw
        .number
        .ok_or_else(|| ImpactError::validation(&label, "missing number"))?;
    let changed_files = require(&label, "changedFiles", raw.changed_files)?;
    let additions = require(&label, "additions", raw.additions)?;
    let deletions = require(&label, "deletions", raw.deletions)?;
    let merged_at = parse_timestamp(
        &label,
        "mergedAt",
        raw.merged_at
            .as_deref()
            .ok_or_else(|| ImpactError::validation(&label, "missing mergedAt"))?,
    )?;
    let created_at = raw
        .created_at
        .as_deref()
        .map(|value| parse_timestamp(&label, "createdAt", value))
        .transpose()?;

    let mut file_churn: BTreeMap<String, i64> = BTreeMap::new();
    let mut noisy_files = 0usize;
    for file in raw.files.iter().flatten() {
        let Some(path) = file.path.as_deref() else {
            continue;
        };
        let additions = file.additions.unwrap_or(0);
        let deletions = file.deletions.unwrap_or(0);
        for (field, value) in [("file.additions", additions), ("file.deletions", deletions)] {
            if value < 0 {
                return Err(ImpactError::DataIntegrity {
                    record: format!("{label} file {path}"),
                    field,
                    value,
                });
            }
        }
        if noise.is_noisy(path) {
            noisy_files += 1;
            continue;
        }
        let slot = file_churn.entry(path.to_string()).or_insert(0);
        *slot = slot.saturating_add(additions.saturating_add(deletions));
    }

    let mut reviews = Vec::new();
    for review in raw.reviews.iter().filter_map(|r| r.nodes.as_ref()).flatten() {
        let reviewer = login_of(review.author.as_ref());
        let Some(submitted) = review.submitted_at.as_deref() else {
            append_run_log(
                "debug",
                "normalize.review.pending_dropped",
                json!({
                    "record": label,
                    "reviewer": reviewer
                }),
            );
            continue;
        };
        reviews.push(ReviewEvent {
            pr_number: number,
            reviewer,
            state: review.state.clone().unwrap_or_default(),
            submitted_at: parse_timestamp(&label, "submittedAt", submitted)?,
            review_comment_count: total_count(review.comments.as_ref()),
        });
    }

    Ok(NormalizedPullRequest {
        pull_request: PullRequest {
            number,
            node_id: raw.id.clone().unwrap_or_default(),
            title: raw.title.clone().unwrap_or_default(),
            url: raw.url.clone().unwrap_or_default(),
            author: login_of(raw.author.as_ref()),
            merged_at,
            created_at,
            changed_files,
            additions,
            deletions,
            comment_count: total_count(raw.comments.as_ref()),
            thread_count: total_count(raw.review_threads.as_ref()),
            file_churn,
        },
        reviews,
        noisy_files,
    })
}

fn require(label: &str, field: &str, value: Option<i64>) -> Result<i64, ImpactError> {
    value.ok_or_else(|| ImpactError::validation(label, format!("missing {field}")))
}

fn parse_timestamp(label: &str, field: &str, value: &str) -> Result<DateTime<Utc>, ImpactError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ImpactError::validation(label, format!("invalid {field} {value:?}: {e}")))
}

fn login_of(actor: Option<&RawActor>) -> String {
    actor
        .and_then(|a| a.login.clone())
        .filter(|login| !login.trim().is_empty())
        .unwrap_or_else(|| GHOST_LOGIN.to_string())
}

fn total_count(count: Option<&RawCount>) -> i64 {
    count.and_then(|c| c.total_count).unwrap_or(0)
}

fn record_label_from_value(value: &Value, index: usize) -> String {
    value
        .get("number")
        .and_then(Value::as_u64)
        .map(|n| format!("PR #{n}"))
        .unwrap_or_else(|| format!("record[{index}]"))
}

#[cfg(test)]
mod tests {
    use super::{normalize_records, NoiseFilter, GHOST_LOGIN};
    use crate::config::{default_noise_patterns, InvalidRecordPolicy};
    use crate::errors::ImpactError;
    use serde_json::{json, Value};

    fn raw_pr(number: u64) -> Value {
        json!({
            "id": format!("node_{number}"),
            "number": number,
            "title": format!("PR {number}"),
            "url": format!("https://github.com/acme/app/pull/{number}"),
            "author": {"login": "alice"},
            "mergedAt": "2026-03-04T10:00:00Z",
            "createdAt": "2026-03-03T10:00:00Z",
            "changedFiles": 3,
            "additions": 40,
            "deletions": 10,
            "comments": {"totalCount": 2},
            "reviewThreads": {"totalCount": 1},
            "reviews": {"nodes": [
                {"author": {"login": "bob"}, "state": "APPROVED",
                 "submittedAt": "2026-03-04T09:00:00Z", "comments": {"totalCount": 4}}
            ]},
            "_files": [
                {"path": "frontend/app.tsx", "additions": 30, "deletions": 5},
                {"path": "pnpm-lock.yaml", "additions": 900, "deletions": 900},
                {"path": "README.md", "additions": 10, "deletions": 5}
            ]
        })
    }

    fn noise() -> NoiseFilter {
        NoiseFilter::new(&default_noise_patterns()).expect("patterns")
    }

    #[test]
    fn normalizes_pr_and_reviews_and_drops_noisy_files() {
        let batch =
            normalize_records(&[raw_pr(7)], InvalidRecordPolicy::Abort, &noise()).expect("batch");
        assert_eq!(batch.pull_requests.len(), 1);
        let pr = &batch.pull_requests[0];
        assert_eq!(pr.number, 7);
        assert_eq!(pr.author, "alice");
        assert_eq!(pr.churn(), 50);
        assert_eq!(pr.comment_count, 2);
        assert_eq!(pr.thread_count, 1);
        assert_eq!(pr.file_churn.get("frontend/app.tsx"), Some(&35));
        assert_eq!(pr.file_churn.get("README.md"), Some(&15));
        assert!(!pr.file_churn.contains_key("pnpm-lock.yaml"));

        assert_eq!(batch.reviews.len(), 1);
        assert_eq!(batch.reviews[0].reviewer, "bob");
        assert_eq!(batch.reviews[0].pr_number, 7);
        assert_eq!(batch.reviews[0].review_comment_count, 4);
    }

    #[test]
    fn disabled_noise_filter_keeps_lockfiles() {
        let batch = normalize_records(
            &[raw_pr(7)],
            InvalidRecordPolicy::Abort,
            &NoiseFilter::disabled(),
        )
        .expect("batch");
        assert_eq!(
            batch.pull_requests[0].file_churn.get("pnpm-lock.yaml"),
            Some(&1800)
        );
    }

    #[test]
    fn missing_pr_level_metadata_is_skipped_under_skip_policy() {
        let mut bad = raw_pr(8);
        bad.as_object_mut().expect("object").remove("additions");
        let batch = normalize_records(
            &[raw_pr(7), bad],
            InvalidRecordPolicy::Skip,
            &noise(),
        )
        .expect("batch");
        assert_eq!(batch.pull_requests.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].record, "PR #8");
        assert!(batch.skipped[0].reason.contains("additions"));
    }

    #[test]
    fn missing_pr_level_metadata_aborts_under_abort_policy() {
        let mut bad = raw_pr(9);
        bad.as_object_mut().expect("object").remove("changedFiles");
        let err = normalize_records(&[raw_pr(7), bad], InvalidRecordPolicy::Abort, &noise())
            .expect_err("abort");
        match err {
            ImpactError::Validation { record, reason } => {
                assert_eq!(record, "PR #9");
                assert!(reason.contains("changedFiles"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn partial_and_empty_file_lists_are_valid() {
        let mut pr = raw_pr(10);
        pr.as_object_mut().expect("object").remove("_files");
        let batch =
            normalize_records(&[pr], InvalidRecordPolicy::Abort, &noise()).expect("batch");
        assert!(batch.pull_requests[0].file_churn.is_empty());
        assert_eq!(batch.pull_requests[0].churn(), 50);
    }

    #[test]
    fn absent_optional_counts_default_to_zero() {
        let raw = json!({
            "number": 11,
            "mergedAt": "2026-03-04T10:00:00+00:00",
            "changedFiles": 1,
            "additions": 10,
            "deletions": 5,
            "reviews": {"nodes": [
                {"author": {"login": "bob"}, "state": "APPROVED", "submittedAt": "2026-03-04T10:00:00.123456+00:00"},
                {"author": null, "state": "PENDING"}
            ]}
        });
        let batch =
            normalize_records(&[raw], InvalidRecordPolicy::Abort, &noise()).expect("batch");
        let pr = &batch.pull_requests[0];
        assert_eq!(pr.author, GHOST_LOGIN);
        assert_eq!(pr.comment_count, 0);
        assert_eq!(pr.thread_count, 0);
        assert_eq!(batch.reviews.len(), 1);
        assert_eq!(batch.reviews[0].review_comment_count, 0);
    }

    #[test]
    fn wrongly_typed_payload_is_a_validation_error() {
        let raw = json!({"number": 12, "changedFiles": "lots"});
        let batch =
            normalize_records(&[raw], InvalidRecordPolicy::Skip, &noise()).expect("batch");
        assert!(batch.pull_requests.is_empty());
        assert_eq!(batch.skipped[0].record, "PR #12");
    }

    #[test]
    fn negative_counts_pass_through_for_integrity_checks() {
        let mut raw = raw_pr(13);
        raw["deletions"] = json!(-4);
        let batch =
            normalize_records(&[raw], InvalidRecordPolicy::Abort, &noise()).expect("batch");
        assert_eq!(batch.pull_requests[0].deletions, -4);
    }

    #[test]
    fn negative_file_counts_fail_before_merge_or_noise_filtering() {
        let mut duplicated = raw_pr(14);
        duplicated["_files"] = json!([
            {"path": "src/a.rs", "additions": -5, "deletions": 0},
            {"path": "src/a.rs", "additions": 20, "deletions": 0}
        ]);
        let err = normalize_records(&[duplicated], InvalidRecordPolicy::Skip, &noise())
            .expect_err("integrity");
        assert!(matches!(
            err,
            ImpactError::DataIntegrity { field: "file.additions", value: -5, .. }
        ));

        let mut noisy = raw_pr(15);
        noisy["_files"] = json!([
            {"path": "pnpm-lock.yaml", "additions": 3, "deletions": -7}
        ]);
        let err = normalize_records(&[noisy], InvalidRecordPolicy::Skip, &noise())
            .expect_err("integrity");
        match err {
            ImpactError::DataIntegrity { record, field, value } => {
                assert_eq!(record, "PR #15 file pnpm-lock.yaml");
                assert_eq!(field, "file.deletions");
                assert_eq!(value, -7);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_paths_with_huge_churn_saturate() {
        let mut raw = raw_pr(16);
        raw["_files"] = json!([
            {"path": "src/a.rs", "additions": 5_000_000_000_000_000_000i64, "deletions": 0},
            {"path": "src/a.rs", "additions": 5_000_000_000_000_000_000i64, "deletions": 0}
        ]);
        let batch =
            normalize_records(&[raw], InvalidRecordPolicy::Abort, &noise()).expect("batch");
        assert_eq!(batch.pull_requests[0].file_churn.get("src/a.rs"), Some(&i64::MAX));
    }

    #[test]
    fn noise_filter_matches_paths_and_basenames() {
        let filter = noise();
        assert!(filter.is_noisy("pnpm-lock.yaml"));
        assert!(filter.is_noisy("yarn.lock"));
        assert!(filter.is_noisy("dist/bundle.js"));
        assert!(filter.is_noisy("foo/__snapshots__/bar.snap"));
        assert!(!filter.is_noisy("src/api/handler.ts"));
        assert!(!filter.is_noisy("frontend/src/scenes/app.tsx"));
    }
}
