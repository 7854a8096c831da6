use crate::errors::ImpactError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 8 * 1024 * 1024;
pub const LOG_FILE_NAME: &str = "impactboard.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub min_level: LogLevel,
    pub max_payload_bytes: usize,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            min_level: LogLevel::Info,
            max_payload_bytes: 4096,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn enabled(&self, level: &str) -> bool {
        LogLevel::parse(level).map_or(true, |level| level >= self.min_level)
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), ImpactError> {
        if !self.enabled(event.level) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ImpactError::Io(e.to_string()))?;
        }
        self.rotate_if_full()?;

        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| ImpactError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ImpactError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ImpactError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| ImpactError::Io(e.to_string()))?;
        Ok(())
    }

    fn rotate_if_full(&self) -> Result<(), ImpactError> {
        let Ok(meta) = fs::metadata(&self.path) else {
            return Ok(());
        };
        if meta.len() < self.max_file_bytes {
            return Ok(());
        }
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");
        fs::rename(&self.path, PathBuf::from(rotated)).map_err(|e| ImpactError::Io(e.to_string()))
    }
}

fn global_logger() -> &'static Mutex<Option<JsonlLogger>> {
    static LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();
    LOGGER.get_or_init(|| Mutex::new(None))
}

/// Installs the process-wide run log. Until this is called, `append_run_log`
/// discards events.
pub fn init_run_log(logger: JsonlLogger) {
    if let Ok(mut slot) = global_logger().lock() {
        *slot = Some(logger);
    }
}

pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Ok(slot) = global_logger().lock() else {
        return;
    };
    if let Some(logger) = slot.as_ref() {
        // a broken log sink must never fail a scoring run
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

pub fn structured_fallback_line(stage: &str, state: &str, message: &str) -> String {
    format!(
        "stage={stage} state={state} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, JsonlLogger, LogEvent, LogLevel};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "pipeline.normalize.completed",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"pipeline.normalize.completed\""));
        assert!(text.contains("..."));
    }

    #[test]
    fn events_below_min_level_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.min_level = LogLevel::Warn;

        logger
            .append(&LogEvent {
                level: "debug",
                event_type: "noise",
                payload: json!({}),
            })
            .expect("append debug");
        logger
            .append(&LogEvent {
                level: "warn",
                event_type: "normalize.record.skipped",
                payload: json!({"record": "PR #7"}),
            })
            .expect("append warn");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("normalize.record.skipped"));
    }

    #[test]
    fn full_log_file_is_rotated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, vec![b'x'; 64]).expect("seed");
        let mut logger = JsonlLogger::new(&path);
        logger.max_file_bytes = 32;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "after.rotation",
                payload: json!({}),
            })
            .expect("append");

        assert!(dir.path().join("run.jsonl.1").exists());
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with('{'));
    }

    #[test]
    fn level_parsing_accepts_aliases() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("trace"), None);
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("score", "done", "hello\nworld");
        assert_eq!(line, "stage=score state=done message=hello\\nworld ");
    }
}
