pub mod aggregate;
pub mod config;
pub mod core_dirs;
pub mod dashboard;
pub mod dedup;
pub mod errors;
pub mod gh;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod runtime;
pub mod snapshot;

use chrono::{DateTime, Duration, Utc};
use clap::{error::ErrorKind, Parser};
use config::{load_config, resolve_data_dir, AppConfig, CliOverrides};
use dashboard::{render_dashboard, render_text_report, visible_scores};
use errors::ImpactError;
use gh::GhClient;
use logging::{append_run_log, init_run_log, structured_fallback_line, JsonlLogger, LOG_FILE_NAME};
use pipeline::run_scoring;
use runtime::ProductionRuntime;
use serde_json::json;
use snapshot::{
    latest_file, load_raw_dump, load_snapshot, processed_dir, raw_dir, write_raw_dump,
    write_snapshot, ScoreSnapshot, RAW_PREFIX, SCORES_PREFIX,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Lines printed by the plain-text leaderboard.
pub const TEXT_REPORT_LIMIT: usize = 10;
const DASHBOARD_WIDTH: u16 = 110;

#[derive(Debug, Clone, Parser)]
#[command(name = "impactboard")]
#[command(about = "Engineer impact leaderboard built from merged GitHub pull requests")]
pub struct Cli {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory that relative data paths resolve against
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    /// Raw PR dump to score instead of the latest one under the data dir
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// End of the scoring window (RFC 3339); defaults to now
    #[arg(long)]
    pub as_of: Option<String>,
    #[arg(long)]
    pub lookback_days: Option<u32>,
    /// Leaderboard size shown on the dashboard
    #[arg(long)]
    pub top: Option<usize>,
    /// Keep lockfiles, snapshots and generated files when attributing churn
    #[arg(long, default_value_t = false)]
    pub include_noisy: bool,
    #[arg(long)]
    pub owner: Option<String>,
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long, default_value_t = false, conflicts_with_all = ["score_only", "dashboard_only"])]
    pub fetch_only: bool,
    #[arg(long, default_value_t = false, conflicts_with = "dashboard_only")]
    pub score_only: bool,
    #[arg(long, default_value_t = false)]
    pub dashboard_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    FetchOnly,
    ScoreOnly,
    DashboardOnly,
    ScoreAndRender,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        if self.fetch_only {
            RunMode::FetchOnly
        } else if self.score_only {
            RunMode::ScoreOnly
        } else if self.dashboard_only {
            RunMode::DashboardOnly
        } else {
            RunMode::ScoreAndRender
        }
    }

    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            working_dir: self.working_dir.clone(),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            lookback_days: self.lookback_days,
            top_n: self.top,
            include_noisy: self.include_noisy,
        }
    }
}

pub fn run() -> Result<i32, ImpactError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ImpactError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ImpactError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ImpactError::Cli(error.to_string())),
        },
    };

    let (cfg, working_dir) = load_config(&cli.overrides(), cwd, runtime.file_system.as_ref())?;
    let data_dir = resolve_data_dir(&cfg, &working_dir);
    init_run_log(JsonlLogger {
        path: data_dir.join("logs").join(LOG_FILE_NAME),
        min_level: cfg.logging.level,
        max_payload_bytes: cfg.logging.max_payload_bytes,
        max_file_bytes: cfg.logging.max_file_bytes,
    });

    let now: DateTime<Utc> = runtime.clock.now().into();
    let as_of = match &cli.as_of {
        Some(raw) => parse_as_of(raw)?,
        None => now,
    };
    let mode = cli.mode();
    append_run_log(
        "info",
        "run.started",
        json!({
            "mode": format!("{mode:?}"),
            "repository": format!("{}/{}", cfg.repository.owner, cfg.repository.name),
            "data_dir": data_dir.display().to_string(),
            "as_of": as_of.to_rfc3339(),
            "exclude_noisy": cfg.noise.exclude_noisy
        }),
    );

    let ctx = RunContext {
        cfg: &cfg,
        runtime,
        data_dir: &data_dir,
        cwd,
        now,
        as_of,
    };
    match mode {
        RunMode::FetchOnly => {
            let path = ctx.fetch_raw()?;
            runtime
                .terminal
                .write_line(&format!("raw dump written to {}", path.display()))?;
        }
        RunMode::ScoreOnly => {
            let snapshot = ctx.score_and_persist(cli.input.as_deref())?;
            for line in render_text_report(&snapshot, TEXT_REPORT_LIMIT) {
                runtime.terminal.write_line(&line)?;
            }
        }
        RunMode::DashboardOnly => {
            let snapshot = ctx.load_dashboard_snapshot()?;
            ctx.render(&snapshot)?;
        }
        RunMode::ScoreAndRender => {
            let snapshot = ctx.score_and_persist(cli.input.as_deref())?;
            ctx.render(&snapshot)?;
        }
    }
    append_run_log("info", "run.completed", json!({ "mode": format!("{mode:?}") }));
    Ok(0)
}

pub fn parse_as_of(raw: &str) -> Result<DateTime<Utc>, ImpactError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ImpactError::Cli(format!("--as-of must be RFC 3339, got {raw:?}: {e}")))
}

struct RunContext<'a> {
    cfg: &'a AppConfig,
    runtime: &'a ProductionRuntime,
    data_dir: &'a Path,
    cwd: &'a Path,
    now: DateTime<Utc>,
    as_of: DateTime<Utc>,
}

impl RunContext<'_> {
    fn fetch_raw(&self) -> Result<PathBuf, ImpactError> {
        let gh = GhClient::new(
            self.runtime.process_runner.as_ref(),
            self.runtime.clock.as_ref(),
            &self.cfg.repository,
            &self.cfg.fetch,
        );
        let since = self.as_of - Duration::days(i64::from(self.cfg.window.lookback_days));
        let records = gh.fetch_all(since, self.as_of)?;
        write_raw_dump(
            self.runtime.file_system.as_ref(),
            self.data_dir,
            &records,
            self.now,
        )
    }

    fn resolve_raw_input(&self, input: Option<&Path>) -> Result<PathBuf, ImpactError> {
        if let Some(path) = input {
            return Ok(if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.cwd.join(path)
            });
        }
        let dir = raw_dir(self.data_dir);
        latest_file(self.runtime.file_system.as_ref(), &dir, RAW_PREFIX)?.ok_or_else(|| {
            ImpactError::Snapshot(format!(
                "no raw dump under {}; run --fetch-only or pass --input",
                dir.display()
            ))
        })
    }

    fn score_file(&self, raw_path: &Path, cfg: &AppConfig) -> Result<ScoreSnapshot, ImpactError> {
        let fs = self.runtime.file_system.as_ref();
        let (records, text) = load_raw_dump(fs, raw_path)?;
        let report = run_scoring(&records, cfg, self.as_of)?;
        for skipped in &report.skipped {
            self.runtime.terminal.write_line(&structured_fallback_line(
                "normalize",
                "skipped",
                &format!("{}: {}", skipped.record, skipped.reason),
            ))?;
        }
        Ok(ScoreSnapshot::from_report(
            &report,
            Some(raw_path),
            &text,
            self.now,
            cfg.noise.exclude_noisy,
        ))
    }

    fn score_and_persist(&self, input: Option<&Path>) -> Result<ScoreSnapshot, ImpactError> {
        let raw_path = self.resolve_raw_input(input)?;
        let snapshot = self.score_file(&raw_path, self.cfg)?;
        let path = write_snapshot(
            self.runtime.file_system.as_ref(),
            self.data_dir,
            &snapshot,
            self.now,
            self.cfg.output.keep_snapshots,
        )?;
        self.runtime
            .terminal
            .write_line(&format!("scores written to {}", path.display()))?;
        Ok(snapshot)
    }

    /// Latest persisted snapshot, re-scored in memory from its raw file when
    /// noisy files are requested but the snapshot excluded them.
    fn load_dashboard_snapshot(&self) -> Result<ScoreSnapshot, ImpactError> {
        let fs = self.runtime.file_system.as_ref();
        let dir = processed_dir(self.data_dir);
        let path = latest_file(fs, &dir, SCORES_PREFIX)?.ok_or_else(|| {
            ImpactError::Snapshot(format!(
                "no score snapshot under {}; run --score-only first",
                dir.display()
            ))
        })?;
        let snapshot = load_snapshot(fs, &path)?;
        if self.cfg.noise.exclude_noisy || !snapshot.metadata.exclude_noisy {
            return Ok(snapshot);
        }
        let Some(raw_file) = snapshot.metadata.raw_file.as_deref() else {
            return Ok(snapshot);
        };
        let window_end = parse_as_of(&snapshot.metadata.window_end)?;
        let rescoring = RunContext {
            as_of: window_end,
            ..*self
        };
        append_run_log(
            "info",
            "dashboard.rescore",
            json!({ "raw_file": raw_file, "exclude_noisy": false }),
        );
        rescoring.score_file(Path::new(raw_file), self.cfg)
    }

    fn render(&self, snapshot: &ScoreSnapshot) -> Result<(), ImpactError> {
        let rows = visible_scores(&snapshot.scores, &self.cfg.dashboard).len();
        let height = u16::try_from(rows.max(1) + 16).unwrap_or(u16::MAX);
        let frame = render_dashboard(snapshot, &self.cfg.dashboard, DASHBOARD_WIDTH, height)?;
        self.runtime.terminal.draw(&frame)
    }
}
