//! Value types flowing through the scoring pipeline.
//!
//! Records are immutable once normalized; every scoring run derives its own
//! directory totals, core set and scores from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A merged pull request in canonical form.
///
/// `changed_files`, `additions` and `deletions` are authoritative PR-level
/// totals. `file_churn` may be partial: the fetch layer can truncate file
/// lists and noisy files are filtered out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub node_id: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub merged_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub changed_files: i64,
    pub additions: i64,
    pub deletions: i64,
    pub comment_count: i64,
    pub thread_count: i64,
    /// path -> additions + deletions
    pub file_churn: BTreeMap<String, i64>,
}

impl PullRequest {
    /// PR-level churn. Never derived from the file list.
    pub fn churn(&self) -> i64 {
        self.additions.saturating_add(self.deletions)
    }

    pub fn label(&self) -> String {
        format!("PR #{}", self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub pr_number: u64,
    pub reviewer: String,
    pub state: String,
    pub submitted_at: DateTime<Utc>,
    pub review_comment_count: i64,
}

impl ReviewEvent {
    pub fn label(&self) -> String {
        format!("review by {} on PR #{}", self.reviewer, self.pr_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryChurnEntry {
    pub directory: String,
    pub churn: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDirectorySet {
    pub directories: BTreeSet<String>,
}

impl CoreDirectorySet {
    pub fn contains(&self, directory: &str) -> bool {
        self.directories.contains(directory)
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }
}

impl FromIterator<String> for CoreDirectorySet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            directories: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPr {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub shipping: f64,
    pub complexity: f64,
    pub discussion: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineerScore {
    pub rank: usize,
    pub login: String,
    pub final_impact: f64,
    pub base_impact: f64,
    pub core_multiplier: f64,
    pub consistency_bonus: f64,
    pub shipping_total: f64,
    pub review_total: f64,
    pub active_weeks: u32,
    pub core_touch_ratio: f64,
    pub pr_count: usize,
    pub review_count: usize,
    pub top_prs: Vec<TopPr>,
}
