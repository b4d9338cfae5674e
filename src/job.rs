//! Job coordinator.
//!
//! A [`Job`] moves through `Configured → Submitted → Running → Succeeded | Failed`. Settings
//! are validated (and the output codec resolved) before a job exists at all, so a
//! configuration error never reaches submission. At submission the input must exist before
//! anything under the output location is touched, and the output is prepared before any
//! archive is opened.
//!
//! ```no_run
//! use std::sync::Arc;
//! use traitor::analyzer::TermCountAnalyzer;
//! use traitor::archive::LineArchiveReader;
//! use traitor::{Job, JobConfig, JobState};
//!
//! let config = JobConfig::new("crawl/segments", "out/traitor").with_num_reducers(4);
//! let mut job = Job::new(config)?;
//! let report = job.run(Arc::new(LineArchiveReader), Arc::new(TermCountAnalyzer))?;
//! assert_eq!(job.state(), JobState::Succeeded);
//! report.metrics.print();
//! # Ok::<(), traitor::JobError>(())
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::analyzer::Analyzer;
use crate::archive::ArchiveReader;
use crate::config::{JOB_NAME, JobConfig};
use crate::error::JobError;
use crate::io::compression::{CompressionCodec, codec_named};
use crate::io::output::prepare_output_dir;
use crate::io::select::{InputSelector, expand_roots};
use crate::mapper::RecordMapper;
use crate::metrics::JobMetrics;
use crate::runner::Runner;

/// Lifecycle of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobState {
    Configured,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Configured => "CONFIGURED",
            JobState::Submitted => "SUBMITTED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
        })
    }
}

/// What a successful job produced.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub metrics: JobMetrics,
    /// Files accepted by input selection, in selection order.
    pub selected_files: Vec<PathBuf>,
    /// Selected files whose contribution was lost.
    pub failed_files: Vec<PathBuf>,
    /// Keys omitted under the `drop` overflow policy.
    pub dropped_keys: Vec<String>,
    /// Keys clamped under the `saturate` overflow policy.
    pub saturated_keys: u64,
    pub partitions: Vec<PathBuf>,
    pub keys_written: u64,
    pub elapsed: Duration,
}

/// One configured run of the traitor count.
pub struct Job {
    config: JobConfig,
    codec: Option<Arc<dyn CompressionCodec>>,
    state: JobState,
    history: Vec<JobState>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("config", &self.config)
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_string()))
            .field("state", &self.state)
            .finish()
    }
}

impl Job {
    /// Validate `config` and create a job in the `Configured` state.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] if a setting is invalid or the requested output codec is
    /// not available.
    pub fn new(config: JobConfig) -> Result<Self, JobError> {
        config.validate()?;
        let codec = if config.compress {
            let codec = codec_named(&config.codec).ok_or_else(|| {
                JobError::Config(format!("unknown or disabled output codec '{}'", config.codec))
            })?;
            Some(codec)
        } else {
            None
        };
        Ok(Self { config, codec, state: JobState::Configured, history: vec![JobState::Configured] })
    }

    #[must_use]
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has been in, oldest first.
    #[must_use]
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, next: JobState) {
        info!(from = %self.state, to = %next, "job state change");
        self.state = next;
        self.history.push(next);
    }

    /// Submit and run the job to completion, reading archives with `reader` and analyzing
    /// records with `analyzer`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] if the job was already run; otherwise any job-fatal
    /// error, after which the job is in the `Failed` state.
    pub fn run(
        &mut self,
        reader: Arc<dyn ArchiveReader>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<JobReport, JobError> {
        if self.state != JobState::Configured {
            return Err(JobError::Config(format!("job cannot be run from state {}", self.state)));
        }
        let started = Instant::now();
        match self.execute(reader, analyzer, started) {
            Ok(report) => {
                self.transition(JobState::Succeeded);
                info!(
                    elapsed_ms = report.elapsed.as_millis(),
                    keys = report.keys_written,
                    partitions = report.partitions.len(),
                    "job succeeded"
                );
                info!(counters = %report.metrics.to_json(), "final counters");
                Ok(report)
            }
            Err(e) => {
                self.transition(JobState::Failed);
                error!(error = %e, elapsed_ms = started.elapsed().as_millis(), "job failed");
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        reader: Arc<dyn ArchiveReader>,
        analyzer: Arc<dyn Analyzer>,
        started: Instant,
    ) -> Result<JobReport, JobError> {
        self.transition(JobState::Submitted);
        let cfg = &self.config;
        info!(
            job = JOB_NAME,
            input = %cfg.input.display(),
            output = %cfg.output.display(),
            max_files = cfg.max_files,
            reducers = cfg.num_reducers,
            overwrite = cfg.overwrite,
            compress = cfg.compress,
            combine = cfg.combine,
            overflow = ?cfg.overflow_policy,
            task_timeout_ms = cfg.task_timeout.as_millis(),
            "submitting job"
        );
        expand_roots(&cfg.input)?;
        prepare_output_dir(&cfg.output, cfg.overwrite)?;
        let runner = Runner::new(cfg, self.codec.clone())?;

        self.transition(JobState::Running);
        let cfg = &self.config;
        let selector = InputSelector::new(cfg.suffix.clone(), cfg.max_files);
        let files = selector.select(&cfg.input)?;
        info!(
            phase = "select",
            accepted = files.len(),
            cap = selector.limit().max().unwrap_or(0),
            "input selection finished"
        );

        let mapper = RecordMapper::new(reader, analyzer);
        let outcome = runner.run(&cfg.input, &files, &mapper, &cfg.output)?;

        Ok(JobReport {
            metrics: outcome.metrics,
            selected_files: files.into_iter().map(|f| f.path).collect(),
            failed_files: outcome.failed_files,
            dropped_keys: outcome.dropped_keys,
            saturated_keys: outcome.saturated_keys,
            partitions: outcome.partitions,
            keys_written: outcome.keys_written,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TermCountAnalyzer;
    use crate::testing::MockArchiveReader;

    #[test]
    fn empty_paths_never_make_a_job() {
        let err = Job::new(JobConfig::new("", "out")).unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_codec_is_a_config_error() {
        let cfg = JobConfig::new("in", "out").with_compress(true).with_codec("lz4-frame");
        assert!(Job::new(cfg).unwrap_err().is_config());
    }

    #[test]
    fn missing_input_leaves_the_output_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out");
        std::fs::create_dir(&output)?;
        std::fs::write(output.join("part-r-00000"), "keep\t1\n")?;

        let cfg = JobConfig::new(dir.path().join("gone"), &output).with_overwrite(true);
        let mut job = Job::new(cfg)?;
        let err = job
            .run(Arc::new(MockArchiveReader::new()), Arc::new(TermCountAnalyzer))
            .unwrap_err();
        assert!(matches!(err, JobError::InputNotFound { .. }));
        assert_eq!(std::fs::read_to_string(output.join("part-r-00000"))?, "keep\t1\n");
        assert!(!output.join("_temporary").exists());
        Ok(())
    }

    #[test]
    fn a_job_runs_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in");
        std::fs::create_dir(&input)?;
        let cfg = JobConfig::new(&input, dir.path().join("out")).with_num_reducers(2);
        let mut job = Job::new(cfg)?;
        job.run(Arc::new(MockArchiveReader::new()), Arc::new(TermCountAnalyzer))?;
        assert_eq!(
            job.history(),
            &[JobState::Configured, JobState::Submitted, JobState::Running, JobState::Succeeded]
        );

        let again = job.run(Arc::new(MockArchiveReader::new()), Arc::new(TermCountAnalyzer));
        assert!(again.unwrap_err().is_config());
        assert_eq!(job.state(), JobState::Succeeded);
        Ok(())
    }
}
