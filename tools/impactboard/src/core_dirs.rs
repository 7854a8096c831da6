//! Core-directory classification.
//!
//! Directory churn is summed over every PR in the window after correcting
//! each PR's (possibly truncated) file list up to its PR-level churn. The
//! core set is the smallest prefix of directories, by descending churn, that
//! covers the coverage threshold of total churn mass.

use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::model::{CoreDirectorySet, DirectoryChurnEntry, PullRequest};
use serde_json::json;
use std::collections::BTreeMap;

/// Root-level files are attributed to `"."`.
pub const ROOT_DIRECTORY: &str = ".";

/// First `depth` parent components of `path`, joined by `/`.
pub fn directory_of(path: &str, depth: usize) -> String {
    let components = path
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    if components.len() <= 1 {
        return ROOT_DIRECTORY.to_string();
    }
    let parents = &components[..components.len() - 1];
    parents[..depth.max(1).min(parents.len())].join("/")
}

/// Factor that lifts the known file-list churn up to the PR aggregate.
///
/// Never scales down, and returns 1.0 when nothing is known.
pub fn scale_factor(aggregate_churn: i64, known_file_churn: i64) -> f64 {
    if known_file_churn <= 0 || aggregate_churn <= known_file_churn {
        return 1.0;
    }
    aggregate_churn as f64 / known_file_churn as f64
}

/// Per-directory churn of one PR, scaled to the PR-level total.
///
/// Empty when the PR carries no file churn.
pub fn scaled_directory_churn(
    pr: &PullRequest,
    depth: usize,
) -> Result<BTreeMap<String, f64>, ImpactError> {
    let mut raw: BTreeMap<String, i64> = BTreeMap::new();
    for (path, churn) in &pr.file_churn {
        if *churn < 0 {
            return Err(ImpactError::DataIntegrity {
                record: format!("{} file {path}", pr.label()),
                field: "file_churn",
                value: *churn,
            });
        }
        let slot = raw.entry(directory_of(path, depth)).or_insert(0);
        *slot = slot.saturating_add(*churn);
    }

    let known = raw.values().copied().fold(0i64, i64::saturating_add);
    if known <= 0 {
        return Ok(BTreeMap::new());
    }
    let scale = scale_factor(pr.churn(), known);
    Ok(raw
        .into_iter()
        .map(|(dir, churn)| (dir, churn as f64 * scale))
        .collect())
}

/// Scaled churn per directory across the corpus, descending by churn with
/// ties broken by directory name.
pub fn directory_churn_totals(
    prs: &[PullRequest],
    depth: usize,
) -> Result<Vec<DirectoryChurnEntry>, ImpactError> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for pr in prs {
        for (dir, churn) in scaled_directory_churn(pr, depth)? {
            *totals.entry(dir).or_insert(0.0) += churn;
        }
    }

    let mut entries = totals
        .into_iter()
        .map(|(directory, churn)| DirectoryChurnEntry { directory, churn })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| {
        b.churn
            .total_cmp(&a.churn)
            .then_with(|| a.directory.cmp(&b.directory))
    });
    Ok(entries)
}

/// Greedy prefix of `entries` (already sorted descending) reaching `threshold`
/// of the total churn mass.
pub fn classify_core_directories(
    entries: &[DirectoryChurnEntry],
    threshold: f64,
) -> CoreDirectorySet {
    let total: f64 = entries.iter().map(|e| e.churn).sum();
    if total <= 0.0 || threshold <= 0.0 {
        return CoreDirectorySet::default();
    }

    let target = threshold * total;
    // relative slack for accumulated rounding in the running sum
    let tolerance = total * 1e-12;
    let mut cumulative = 0.0;
    let mut core = CoreDirectorySet::default();
    for entry in entries {
        if entry.churn <= 0.0 {
            break;
        }
        cumulative += entry.churn;
        core.directories.insert(entry.directory.clone());
        if cumulative + tolerance >= target {
            break;
        }
    }
    core
}

pub fn compute_core_directories(
    prs: &[PullRequest],
    depth: usize,
    threshold: f64,
) -> Result<(Vec<DirectoryChurnEntry>, CoreDirectorySet), ImpactError> {
    let entries = directory_churn_totals(prs, depth)?;
    let core = classify_core_directories(&entries, threshold);
    append_run_log(
        "info",
        "core_dirs.classified",
        json!({
            "directories": entries.len(),
            "total_churn": entries.iter().map(|e| e.churn).sum::<f64>(),
            "threshold": threshold,
            "core": core.directories.iter().collect::<Vec<_>>()
        }),
    );
    Ok((entries, core))
}
