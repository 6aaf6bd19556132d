use std::path::PathBuf;

use thiserror::Error;

/// Failures of the checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint file {path} is not a flat JSON object of timestamps: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint cursor `{cursor}` holds an invalid timestamp `{value}`")]
    InvalidTimestamp { cursor: String, value: String },
}

/// Outcome classes of the analysis call.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Network or provider failure.  The run aborts and its cursor stays put.
    #[error("analysis call failed: {0}")]
    Transient(#[source] anyhow::Error),
    /// The provider answered, but not with a valid digest.  The run degrades
    /// to an insufficient digest and still advances.
    #[error("analysis reply was malformed: {0}")]
    Malformed(String),
}

/// Errors that end a run before its cursor is advanced.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("history fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),
    #[error(transparent)]
    Analysis(AnalysisError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("a digest run for `{0}` is already in progress")]
    RunInProgress(String),
}
