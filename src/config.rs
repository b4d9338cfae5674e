//! Job configuration.
//!
//! A [`JobConfig`] carries every knob the coordinator needs. It is built from defaults,
//! optionally patched by a JSON override file ([`ConfigOverrides`]), and finally by explicit
//! command-line values. [`JobConfig::validate`] runs before a job leaves the configured state.
//!
//! # Example
//!
//! ```
//! use traitor::config::JobConfig;
//!
//! let cfg = JobConfig::new("crawl/segments", "out/traitor")
//!     .with_max_files(10)
//!     .with_num_reducers(4)
//!     .with_overwrite(true);
//! assert!(cfg.validate().is_ok());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::combiners::OverflowPolicy;
use crate::error::JobError;

/// Filename suffix of the archive container format.
pub const DEFAULT_SUFFIX: &str = ".arc.gz";
/// Aggregator worker count when none is given.
pub const DEFAULT_NUM_REDUCERS: usize = 60;
/// Per-task timeout: 3600 * 60 * 60 milliseconds (216 hours).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(3600 * 60 * 60);
/// Attempts per task before the execution layer gives up on it.
pub const DEFAULT_MAX_TASK_ATTEMPTS: u32 = 4;
/// Human-readable job name, logged at submission.
pub const JOB_NAME: &str = "Norvig Award - (13) - Evil Geniuses' Traitor";

/// Everything a job run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Input root: a directory, a single file, or a glob pattern.
    pub input: PathBuf,
    /// Output directory for the partition files.
    pub output: PathBuf,
    /// Override file that was applied, if any.
    pub config_file: Option<PathBuf>,
    /// Remove an existing output directory before running.
    pub overwrite: bool,
    /// Sampling cap on accepted input files. `0` means unbounded.
    pub max_files: u64,
    /// Number of aggregator workers, and therefore output partitions.
    pub num_reducers: usize,
    /// Compress output partitions.
    pub compress: bool,
    /// Codec name used when `compress` is set.
    pub codec: String,
    /// Required filename suffix for input files.
    pub suffix: String,
    /// Pre-aggregate on the mapper side.
    pub combine: bool,
    /// What to do when a key's total leaves the `i64` range.
    pub overflow_policy: OverflowPolicy,
    /// Worker thread count; `None` uses one thread per CPU.
    pub threads: Option<usize>,
    /// Per-task timeout handed to the execution layer.
    pub task_timeout: Duration,
    /// Attempts per task before it is treated as failed.
    pub max_task_attempts: u32,
    /// Delay before the first retry of a failed task.
    pub retry_delay: Duration,
}

impl JobConfig {
    /// Configuration with defaults for everything except the two required paths.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            config_file: None,
            overwrite: false,
            max_files: 0,
            num_reducers: DEFAULT_NUM_REDUCERS,
            compress: false,
            codec: "gzip".to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
            combine: true,
            overflow_policy: OverflowPolicy::Saturate,
            threads: None,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_task_attempts: DEFAULT_MAX_TASK_ATTEMPTS,
            retry_delay: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_max_files(mut self, max_files: u64) -> Self {
        self.max_files = max_files;
        self
    }

    #[must_use]
    pub fn with_num_reducers(mut self, n: usize) -> Self {
        self.num_reducers = n;
        self
    }

    #[must_use]
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn with_combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    #[must_use]
    pub fn with_max_task_attempts(mut self, attempts: u32) -> Self {
        self.max_task_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Check the settings a job cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] when the input or output path is empty, when no
    /// reducers are requested, or when a task would get zero attempts.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.input.as_os_str().is_empty() {
            return Err(JobError::Config("an input path is required".into()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(JobError::Config("an output path is required".into()));
        }
        if self.num_reducers == 0 {
            return Err(JobError::Config("the number of reducers must be at least 1".into()));
        }
        if self.max_task_attempts == 0 {
            return Err(JobError::Config("tasks need at least one attempt".into()));
        }
        if self.suffix.is_empty() {
            return Err(JobError::Config("the input suffix filter must not be empty".into()));
        }
        Ok(())
    }

    /// Read a JSON override file and apply it on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] if the file cannot be read or does not parse.
    pub fn apply_overrides_file(&mut self, path: impl AsRef<Path>) -> Result<(), JobError> {
        let path = path.as_ref();
        let overrides = ConfigOverrides::from_file(path)
            .map_err(|e| JobError::Config(format!("{e:#}")))?;
        overrides.apply(self);
        self.config_file = Some(path.to_path_buf());
        Ok(())
    }
}

/// Optional settings loaded from a JSON file passed with `--conf`.
///
/// Every field is optional; only the ones present replace the current value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub overwrite: Option<bool>,
    pub max_files: Option<u64>,
    pub num_reducers: Option<usize>,
    pub compress: Option<bool>,
    pub codec: Option<String>,
    pub suffix: Option<String>,
    pub combine: Option<bool>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub threads: Option<usize>,
    pub task_timeout_ms: Option<u64>,
    pub max_task_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Parse an override file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid override object.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config overrides {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse config overrides {}", path.display()))
    }

    /// Patch `cfg` with every value present in this override set.
    pub fn apply(&self, cfg: &mut JobConfig) {
        if let Some(v) = self.overwrite {
            cfg.overwrite = v;
        }
        if let Some(v) = self.max_files {
            cfg.max_files = v;
        }
        if let Some(v) = self.num_reducers {
            cfg.num_reducers = v;
        }
        if let Some(v) = self.compress {
            cfg.compress = v;
        }
        if let Some(v) = &self.codec {
            cfg.codec.clone_from(v);
        }
        if let Some(v) = &self.suffix {
            cfg.suffix.clone_from(v);
        }
        if let Some(v) = self.combine {
            cfg.combine = v;
        }
        if let Some(v) = self.overflow_policy {
            cfg.overflow_policy = v;
        }
        if let Some(v) = self.threads {
            cfg.threads = Some(v);
        }
        if let Some(ms) = self.task_timeout_ms {
            cfg.task_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = self.max_task_attempts {
            cfg.max_task_attempts = v;
        }
        if let Some(ms) = self.retry_delay_ms {
            cfg.retry_delay = Duration::from_millis(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_job_contract() {
        let cfg = JobConfig::new("in", "out");
        assert_eq!(cfg.num_reducers, 60);
        assert_eq!(cfg.max_files, 0);
        assert_eq!(cfg.suffix, ".arc.gz");
        assert_eq!(cfg.task_timeout, Duration::from_secs(3600 * 60 * 60 / 1000));
        assert!(!cfg.overwrite);
        assert!(!cfg.compress);
        assert!(cfg.combine);
    }

    #[test]
    fn empty_paths_are_rejected() {
        assert!(JobConfig::new("", "out").validate().unwrap_err().is_config());
        assert!(JobConfig::new("in", "").validate().unwrap_err().is_config());
        assert!(
            JobConfig::new("in", "out")
                .with_num_reducers(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn overrides_only_touch_present_fields() {
        let mut cfg = JobConfig::new("in", "out").with_max_files(3);
        let ov: ConfigOverrides =
            serde_json::from_str(r#"{"num_reducers": 8, "overflow_policy": "drop"}"#).unwrap();
        ov.apply(&mut cfg);
        assert_eq!(cfg.num_reducers, 8);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::Drop);
        assert_eq!(cfg.max_files, 3);
    }

    #[test]
    fn unknown_override_fields_are_rejected() {
        let parsed = serde_json::from_str::<ConfigOverrides>(r#"{"reducers": 8}"#);
        assert!(parsed.is_err());
    }
}
