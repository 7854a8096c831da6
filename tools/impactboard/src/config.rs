use crate::errors::ImpactError;
use crate::logging::LogLevel;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub lookback_days: Option<u32>,
    pub top_n: Option<usize>,
    pub include_noisy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRecordPolicy {
    Skip,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub repository: RepositoryConfig,
    pub window: WindowConfig,
    pub weights: WeightsConfig,
    pub classifier: ClassifierConfig,
    pub noise: NoiseConfig,
    pub normalize: NormalizeConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    pub lookback_days: u32,
    pub consistency_weeks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightsConfig {
    pub shipping: f64,
    pub review: f64,
    pub complexity_churn: f64,
    pub discussion: f64,
    pub review_comment: f64,
    pub core_boost: f64,
    pub consistency_boost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    pub core_coverage_threshold: f64,
    pub directory_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoiseConfig {
    pub exclude_noisy: bool,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizeConfig {
    pub on_invalid: InvalidRecordPolicy,
    pub exclude_self_reviews: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    pub search_window_days: u32,
    pub search_per_page: u32,
    pub review_page_size: u32,
    pub file_page_size: u32,
    pub retry_max: u32,
    pub retry_backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub keep_snapshots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    pub top_n: usize,
    pub min_impact: f64,
    pub hide_bots: bool,
    pub bot_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub max_payload_bytes: usize,
    pub max_file_bytes: u64,
}

pub fn default_noise_patterns() -> Vec<String> {
    [
        "pnpm-lock.yaml",
        "yarn.lock",
        "package-lock.json",
        "*.snap",
        "*.generated.*",
        "*.min.js",
        "*.min.css",
        "dist/*",
        "build/*",
        "*.map",
        "__generated__/*",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig {
                owner: "PostHog".to_string(),
                name: "posthog".to_string(),
            },
            window: WindowConfig {
                lookback_days: 90,
                consistency_weeks: 12,
            },
            weights: WeightsConfig {
                shipping: 0.65,
                review: 0.35,
                complexity_churn: 0.6,
                discussion: 0.3,
                review_comment: 0.05,
                core_boost: 0.3,
                consistency_boost: 0.2,
            },
            classifier: ClassifierConfig {
                core_coverage_threshold: 0.80,
                directory_depth: 1,
            },
            noise: NoiseConfig {
                exclude_noisy: true,
                patterns: default_noise_patterns(),
            },
            normalize: NormalizeConfig {
                on_invalid: InvalidRecordPolicy::Skip,
                exclude_self_reviews: true,
            },
            fetch: FetchConfig {
                search_window_days: 7,
                search_per_page: 100,
                review_page_size: 100,
                file_page_size: 100,
                retry_max: 3,
                retry_backoff_seconds: 2,
            },
            output: OutputConfig {
                data_dir: PathBuf::from("data"),
                keep_snapshots: 20,
            },
            dashboard: DashboardConfig {
                top_n: 5,
                min_impact: 0.0,
                hide_bots: true,
                bot_patterns: ["bot", "[bot]", "-app", "dependabot", "copilot-swe"]
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                max_payload_bytes: 4096,
                max_file_bytes: crate::logging::DEFAULT_MAX_FILE_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    repository: Option<PartialRepositoryConfig>,
    window: Option<PartialWindowConfig>,
    weights: Option<PartialWeightsConfig>,
    classifier: Option<PartialClassifierConfig>,
    noise: Option<PartialNoiseConfig>,
    normalize: Option<PartialNormalizeConfig>,
    fetch: Option<PartialFetchConfig>,
    output: Option<PartialOutputConfig>,
    dashboard: Option<PartialDashboardConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRepositoryConfig {
    owner: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialWindowConfig {
    lookback_days: Option<u32>,
    consistency_weeks: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialWeightsConfig {
    shipping: Option<f64>,
    review: Option<f64>,
    complexity_churn: Option<f64>,
    discussion: Option<f64>,
    review_comment: Option<f64>,
    core_boost: Option<f64>,
    consistency_boost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialClassifierConfig {
    core_coverage_threshold: Option<f64>,
    directory_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialNoiseConfig {
    exclude_noisy: Option<bool>,
    patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialNormalizeConfig {
    on_invalid: Option<InvalidRecordPolicy>,
    exclude_self_reviews: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFetchConfig {
    search_window_days: Option<u32>,
    search_per_page: Option<u32>,
    review_page_size: Option<u32>,
    file_page_size: Option<u32>,
    retry_max: Option<u32>,
    retry_backoff_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    data_dir: Option<PathBuf>,
    keep_snapshots: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDashboardConfig {
    top_n: Option<usize>,
    min_impact: Option<f64>,
    hide_bots: Option<bool>,
    bot_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    level: Option<LogLevel>,
    max_payload_bytes: Option<usize>,
    max_file_bytes: Option<u64>,
}

/// Loads defaults, merges the optional TOML file, applies CLI overrides and
/// validates. Returns the config plus the resolved working directory.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, PathBuf), ImpactError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| ImpactError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;

    let working_dir = overrides
        .working_dir
        .as_ref()
        .map(|dir| absolutize_path(process_cwd, dir))
        .unwrap_or_else(|| process_cwd.to_path_buf());
    Ok((cfg, working_dir))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(repository) = partial.repository {
        if let Some(owner) = repository.owner {
            cfg.repository.owner = owner;
        }
        if let Some(name) = repository.name {
            cfg.repository.name = name;
        }
    }

    if let Some(window) = partial.window {
        if let Some(value) = window.lookback_days {
            cfg.window.lookback_days = value;
        }
        if let Some(value) = window.consistency_weeks {
            cfg.window.consistency_weeks = value;
        }
    }

    if let Some(weights) = partial.weights {
        let target = &mut cfg.weights;
        for (slot, value) in [
            (&mut target.shipping, weights.shipping),
            (&mut target.review, weights.review),
            (&mut target.complexity_churn, weights.complexity_churn),
            (&mut target.discussion, weights.discussion),
            (&mut target.review_comment, weights.review_comment),
            (&mut target.core_boost, weights.core_boost),
            (&mut target.consistency_boost, weights.consistency_boost),
        ] {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    if let Some(classifier) = partial.classifier {
        if let Some(value) = classifier.core_coverage_threshold {
            cfg.classifier.core_coverage_threshold = value;
        }
        if let Some(value) = classifier.directory_depth {
            cfg.classifier.directory_depth = value;
        }
    }

    if let Some(noise) = partial.noise {
        if let Some(value) = noise.exclude_noisy {
            cfg.noise.exclude_noisy = value;
        }
        if let Some(value) = noise.patterns {
            cfg.noise.patterns = value;
        }
    }

    if let Some(normalize) = partial.normalize {
        if let Some(value) = normalize.on_invalid {
            cfg.normalize.on_invalid = value;
        }
        if let Some(value) = normalize.exclude_self_reviews {
            cfg.normalize.exclude_self_reviews = value;
        }
    }

    if let Some(fetch) = partial.fetch {
        if let Some(value) = fetch.search_window_days {
            cfg.fetch.search_window_days = value;
        }
        if let Some(value) = fetch.search_per_page {
            cfg.fetch.search_per_page = value;
        }
        if let Some(value) = fetch.review_page_size {
            cfg.fetch.review_page_size = value;
        }
        if let Some(value) = fetch.file_page_size {
            cfg.fetch.file_page_size = value;
        }
        if let Some(value) = fetch.retry_max {
            cfg.fetch.retry_max = value;
        }
        if let Some(value) = fetch.retry_backoff_seconds {
            cfg.fetch.retry_backoff_seconds = value;
        }
    }

    if let Some(output) = partial.output {
        if let Some(value) = output.data_dir {
            cfg.output.data_dir = value;
        }
        if let Some(value) = output.keep_snapshots {
            cfg.output.keep_snapshots = value;
        }
    }

    if let Some(dashboard) = partial.dashboard {
        if let Some(value) = dashboard.top_n {
            cfg.dashboard.top_n = value;
        }
        if let Some(value) = dashboard.min_impact {
            cfg.dashboard.min_impact = value;
        }
        if let Some(value) = dashboard.hide_bots {
            cfg.dashboard.hide_bots = value;
        }
        if let Some(value) = dashboard.bot_patterns {
            cfg.dashboard.bot_patterns = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.level {
            cfg.logging.level = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.max_file_bytes {
            cfg.logging.max_file_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(owner) = &overrides.owner {
        cfg.repository.owner = owner.clone();
    }
    if let Some(repo) = &overrides.repo {
        cfg.repository.name = repo.clone();
    }
    if let Some(days) = overrides.lookback_days {
        cfg.window.lookback_days = days;
    }
    if let Some(top_n) = overrides.top_n {
        cfg.dashboard.top_n = top_n;
    }
    if overrides.include_noisy {
        cfg.noise.exclude_noisy = false;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

/// `output.data_dir` resolved against the working directory.
pub fn resolve_data_dir(cfg: &AppConfig, working_dir: &Path) -> PathBuf {
    absolutize_path(working_dir, &cfg.output.data_dir)
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), ImpactError> {
    if cfg.repository.owner.trim().is_empty() || cfg.repository.name.trim().is_empty() {
        return Err(ImpactError::InvalidConfig(
            "repository.owner and repository.name must be non-empty".to_string(),
        ));
    }

    let weights = &cfg.weights;
    for (name, value) in [
        ("shipping", weights.shipping),
        ("review", weights.review),
        ("complexity_churn", weights.complexity_churn),
        ("discussion", weights.discussion),
        ("review_comment", weights.review_comment),
        ("core_boost", weights.core_boost),
        ("consistency_boost", weights.consistency_boost),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ImpactError::InvalidConfig(format!(
                "weights.{name} must be a finite non-negative number, got {value}"
            )));
        }
    }

    let threshold = cfg.classifier.core_coverage_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ImpactError::InvalidConfig(format!(
            "classifier.core_coverage_threshold must be in (0, 1], got {threshold}"
        )));
    }
    if cfg.classifier.directory_depth == 0 {
        return Err(ImpactError::InvalidConfig(
            "classifier.directory_depth must be greater than zero".to_string(),
        ));
    }

    if cfg.window.lookback_days == 0 {
        return Err(ImpactError::InvalidConfig(
            "window.lookback_days must be greater than zero".to_string(),
        ));
    }
    if cfg.window.consistency_weeks == 0 {
        return Err(ImpactError::InvalidConfig(
            "window.consistency_weeks must be greater than zero".to_string(),
        ));
    }

    if cfg.fetch.search_window_days == 0 {
        return Err(ImpactError::InvalidConfig(
            "fetch.search_window_days must be greater than zero".to_string(),
        ));
    }
    for (name, value) in [
        ("search_per_page", cfg.fetch.search_per_page),
        ("review_page_size", cfg.fetch.review_page_size),
        ("file_page_size", cfg.fetch.file_page_size),
    ] {
        if !(1..=100).contains(&value) {
            return Err(ImpactError::InvalidConfig(format!(
                "fetch.{name} must be between 1 and 100, got {value}"
            )));
        }
    }

    for pattern in &cfg.noise.patterns {
        glob::Pattern::new(pattern).map_err(|e| {
            ImpactError::InvalidConfig(format!("invalid noise pattern {pattern:?}: {e}"))
        })?;
    }
    if cfg.dashboard.bot_patterns.iter().any(|p| p.trim().is_empty()) {
        return Err(ImpactError::InvalidConfig(
            "dashboard.bot_patterns must not contain empty entries".to_string(),
        ));
    }

    if !cfg.dashboard.min_impact.is_finite() {
        return Err(ImpactError::InvalidConfig(
            "dashboard.min_impact must be finite".to_string(),
        ));
    }

    Ok(())
}
