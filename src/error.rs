use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Why a single call against the target failed.
#[derive(Debug, Error)]
pub enum CallError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// Failures raised by custom targets.
    #[error("{0}")]
    Other(String),
}

/// Rejected run configuration. Reported before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("user count must be greater than zero")]
    NoUsers,
    #[error("concurrency limit must be between 1 and {max}, got {value}")]
    Concurrency { value: usize, max: usize },
    #[error("a scenario needs at least one step")]
    NoSteps,
}

/// Errors that end a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("user {user_id} failed, aborting the run: {source}")]
    Aborted {
        user_id: usize,
        #[source]
        source: CallError,
    },
    #[error("aggregator task failed: {0}")]
    Aggregator(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}
