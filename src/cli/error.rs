//! CLI error types and conversions

use crate::kv::KvError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] KvError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output error
    #[error("output error: {0}")]
    OutputError(String),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    MetricsError(String),
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::OutputError(e.to_string())
    }
}
