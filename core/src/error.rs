use thiserror::Error;

use crate::engine::EngineError;
use crate::store::StoreError;

pub type AdvisorResult<T> = Result<T, AdvisorError>;

/// Errors raised by the capture/analysis/backtest pipeline.
///
/// Most of these are recorded against the fingerprint or candidate that
/// produced them rather than returned to the caller of the periodic worker.
#[derive(Error, Debug, Clone)]
pub enum AdvisorError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("DDL error: {0}")]
    Ddl(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Another run is already in progress")]
    AlreadyRunning,

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

impl AdvisorError {
    /// Inner message without the type prefix.
    pub fn message(&self) -> &str {
        match self {
            AdvisorError::Capture(msg)
            | AdvisorError::Plan(msg)
            | AdvisorError::Parse(msg)
            | AdvisorError::Ddl(msg)
            | AdvisorError::Validation(msg)
            | AdvisorError::Store(msg)
            | AdvisorError::Config(msg)
            | AdvisorError::Timeout(msg)
            | AdvisorError::Io(msg) => msg,
            AdvisorError::AlreadyRunning => "already running",
            AdvisorError::Cancelled => "cancelled",
        }
    }

    /// Short error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            AdvisorError::Capture(_) => "capture_failure",
            AdvisorError::Plan(_) => "plan_failure",
            AdvisorError::Parse(_) => "parse_failure",
            AdvisorError::Ddl(_) => "ddl_failure",
            AdvisorError::Validation(_) => "validation_failure",
            AdvisorError::Store(_) => "store_failure",
            AdvisorError::Config(_) => "config_error",
            AdvisorError::Timeout(_) => "timeout",
            AdvisorError::AlreadyRunning => "already_running",
            AdvisorError::Cancelled => "cancelled",
            AdvisorError::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for AdvisorError {
    fn from(err: std::io::Error) -> Self {
        AdvisorError::Io(err.to_string())
    }
}

impl From<StoreError> for AdvisorError {
    fn from(err: StoreError) -> Self {
        AdvisorError::Store(err.to_string())
    }
}

impl From<EngineError> for AdvisorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(what) => AdvisorError::Timeout(what),
            other => AdvisorError::Ddl(other.to_string()),
        }
    }
}
