//! Flat JSON persistence: raw fetch dumps and score snapshots.
//!
//! Layout under the data dir:
//! - `raw/prs_<stamp>.json` holds the fetch layer output
//! - `processed/scores_<stamp>.json` holds one scoring run
//!
//! Stamps sort lexicographically, so the greatest file name is the latest.

use crate::errors::ImpactError;
use crate::logging::append_run_log;
use crate::model::EngineerScore;
use crate::pipeline::ScoringReport;
use crate::runtime::FileSystem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;
pub const RAW_PREFIX: &str = "prs_";
pub const SCORES_PREFIX: &str = "scores_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub schema_version: u32,
    pub computed_at: String,
    pub raw_file: Option<String>,
    pub input_sha256: String,
    pub pr_count: usize,
    pub review_count: usize,
    pub skipped_records: usize,
    pub engineer_count: usize,
    pub window_start: String,
    pub window_end: String,
    pub exclude_noisy: bool,
    pub core_directories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub metadata: SnapshotMetadata,
    pub scores: Vec<EngineerScore>,
}

impl ScoreSnapshot {
    pub fn from_report(
        report: &ScoringReport,
        raw_file: Option<&Path>,
        raw_text: &str,
        computed_at: DateTime<Utc>,
        exclude_noisy: bool,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                schema_version: SCHEMA_VERSION,
                computed_at: computed_at.to_rfc3339(),
                raw_file: raw_file.map(|p| p.display().to_string()),
                input_sha256: input_digest(raw_text.as_bytes()),
                pr_count: report.pr_count,
                review_count: report.review_count,
                skipped_records: report.skipped.len(),
                engineer_count: report.scores.len(),
                window_start: report.window.start.to_rfc3339(),
                window_end: report.window.end.to_rfc3339(),
                exclude_noisy,
                core_directories: report.core_directories.directories.iter().cloned().collect(),
            },
            scores: report.scores.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, ImpactError> {
        serde_json::to_string_pretty(self).map_err(|e| ImpactError::Snapshot(e.to_string()))
    }
}

pub fn input_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S").to_string()
}

pub fn raw_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("raw")
}

pub fn processed_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("processed")
}

pub fn write_raw_dump(
    fs: &dyn FileSystem,
    data_dir: &Path,
    records: &[Value],
    at: DateTime<Utc>,
) -> Result<PathBuf, ImpactError> {
    let dir = raw_dir(data_dir);
    fs.create_dir_all(&dir)?;
    let path = dir.join(format!("{RAW_PREFIX}{}.json", timestamp_slug(at)));
    let text =
        serde_json::to_string_pretty(records).map_err(|e| ImpactError::Snapshot(e.to_string()))?;
    fs.write_string(&path, &text)?;
    append_run_log(
        "info",
        "snapshot.raw.written",
        json!({
            "path": path.display().to_string(),
            "records": records.len()
        }),
    );
    Ok(path)
}

pub fn load_raw_dump(fs: &dyn FileSystem, path: &Path) -> Result<(Vec<Value>, String), ImpactError> {
    let text = fs.read_to_string(path)?;
    let records: Vec<Value> = serde_json::from_str(&text).map_err(|e| {
        ImpactError::Snapshot(format!("{} is not a JSON array of PRs: {e}", path.display()))
    })?;
    Ok((records, text))
}

/// Latest `<prefix>*.json` in `dir`, if any.
pub fn latest_file(
    fs: &dyn FileSystem,
    dir: &Path,
    prefix: &str,
) -> Result<Option<PathBuf>, ImpactError> {
    Ok(matching_files(fs, dir, prefix)?.pop())
}

fn matching_files(
    fs: &dyn FileSystem,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, ImpactError> {
    let mut files = fs
        .list_files(dir)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".json"))
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

pub fn write_snapshot(
    fs: &dyn FileSystem,
    data_dir: &Path,
    snapshot: &ScoreSnapshot,
    at: DateTime<Utc>,
    keep: usize,
) -> Result<PathBuf, ImpactError> {
    let dir = processed_dir(data_dir);
    fs.create_dir_all(&dir)?;
    let path = dir.join(format!("{SCORES_PREFIX}{}.json", timestamp_slug(at)));
    fs.write_string(&path, &snapshot.to_json()?)?;
    let pruned = prune_snapshots(fs, &dir, keep)?;
    append_run_log(
        "info",
        "snapshot.scores.written",
        json!({
            "path": path.display().to_string(),
            "engineers": snapshot.scores.len(),
            "input_sha256": snapshot.metadata.input_sha256,
            "pruned": pruned.len()
        }),
    );
    Ok(path)
}

pub fn load_snapshot(fs: &dyn FileSystem, path: &Path) -> Result<ScoreSnapshot, ImpactError> {
    let text = fs.read_to_string(path)?;
    let snapshot: ScoreSnapshot = serde_json::from_str(&text)
        .map_err(|e| ImpactError::Snapshot(format!("{}: {e}", path.display())))?;
    if snapshot.metadata.schema_version != SCHEMA_VERSION {
        return Err(ImpactError::Snapshot(format!(
            "{}: unsupported schema_version {}",
            path.display(),
            snapshot.metadata.schema_version
        )));
    }
    Ok(snapshot)
}

/// Removes the oldest score snapshots beyond `keep`. `keep == 0` disables pruning.
pub fn prune_snapshots(
    fs: &dyn FileSystem,
    dir: &Path,
    keep: usize,
) -> Result<Vec<PathBuf>, ImpactError> {
    if keep == 0 {
        return Ok(Vec::new());
    }
    let files = matching_files(fs, dir, SCORES_PREFIX)?;
    let excess = files.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for path in files.into_iter().take(excess) {
        fs.remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}
