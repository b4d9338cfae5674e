//! Job-level error taxonomy.
//!
//! Per-record and per-file problems never show up here: the mapper counts and logs them.
//! Everything in [`JobError`] either stops a job before it is submitted (configuration) or
//! aborts it as a whole (job-fatal).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a job run.
#[derive(Debug, Error)]
pub enum JobError {
    /// A required setting is missing or malformed. Raised before submission.
    #[error("configuration error: {0}")]
    Config(String),
    /// The input location does not exist or cannot be listed.
    #[error("input path '{}' does not exist or is not readable", path.display())]
    InputNotFound { path: PathBuf },
    /// The input root disappeared while the job was running.
    #[error("input path '{}' vanished while the job was running", path.display())]
    InputVanished { path: PathBuf },
    /// The output location exists and overwriting was not requested.
    #[error("output path '{}' already exists; pass --overwrite to replace it", path.display())]
    OutputExists { path: PathBuf },
    /// A key's total left the `i64` range under the `fail` overflow policy.
    #[error("bounded sum for key '{key}' overflowed the 64-bit range")]
    Overflow { key: String },
    /// A task kept failing after every retry attempt.
    #[error("{phase} task {task} failed after {attempts} attempts: {reason}")]
    Task {
        phase: &'static str,
        task: String,
        attempts: u32,
        reason: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// True for errors raised while validating configuration, before anything is submitted.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, JobError::Config(_))
    }

    /// Process exit code for this failure: 2 for configuration errors, 1 for job failures.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_config() { 2 } else { 1 }
    }
}
