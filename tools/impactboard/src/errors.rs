use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImpactError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("validation error in {record}: {reason}")]
    Validation { record: String, reason: String },
    #[error("data integrity error in {record}: {field} = {value} (must be >= 0)")]
    DataIntegrity {
        record: String,
        field: &'static str,
        value: i64,
    },
}

impl ImpactError {
    pub fn validation(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            record: record.into(),
            reason: reason.into(),
        }
    }
}
