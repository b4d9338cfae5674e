//! Execution of the map, shuffle and reduce phases.
//!
//! The [`Runner`] owns a dedicated rayon pool. A run has three steps:
//!
//! 1. **Map.** One task per selected file. Each attempt starts from an empty local combiner
//!    table and fresh counters; only a successful attempt's output and counters are kept, so a
//!    retried file is never counted twice.
//! 2. **Shuffle.** A full barrier: every map task has finished before any key is routed.
//!    Keys are routed with [`partition_for`](crate::shuffle::partition_for).
//! 3. **Reduce.** One task per bucket. It merges partial sums, finishes each key, and writes
//!    one sorted partition file. Buckets that received nothing still produce an (empty)
//!    partition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::combiners::{BoundedAcc, BoundedSum, BoundedValue, CombineFn, LiftableCombiner};
use crate::config::JobConfig;
use crate::error::JobError;
use crate::io::compression::CompressionCodec;
use crate::io::output::{PartitionWriter, commit_output};
use crate::io::select::{ArchiveFile, expand_roots};
use crate::mapper::RecordMapper;
use crate::metrics::JobMetrics;
use crate::shuffle::{Bucket, MapOutput, ShuffleBuckets};

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry settings for the tasks of `config`.
    #[must_use]
    pub fn for_job(config: &JobConfig) -> Self {
        let initial = u64::try_from(config.retry_delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_attempts: config.max_task_attempts.max(1),
            initial_delay_ms: initial,
            max_delay_ms: initial.saturating_mul(50).max(initial),
            ..Self::default()
        }
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        if self.backoff_multiplier <= 1.0 {
            return delay_ms.min(self.max_delay_ms);
        }
        let next = (delay_ms as f64 * self.backoff_multiplier).min(self.max_delay_ms as f64);
        // Bounded by max_delay_ms above.
        next as u64
    }
}

/// Retry `operation` with exponential backoff.
///
/// `operation` receives the 1-based attempt number. Errors for which `retryable` returns
/// false end the loop at once.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first non-retryable error.
pub fn retry_with_backoff<T, F, P>(config: &RetryConfig, retryable: P, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !retryable(&err) || attempt >= config.max_attempts {
                    return Err(err);
                }
                warn!(attempt, delay_ms, error = format!("{err:#}"), "task attempt failed; retrying");
                std::thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}

/// Everything but a bounded-sum overflow under the `fail` policy is worth another attempt.
fn is_retryable(err: &anyhow::Error) -> bool {
    !matches!(err.downcast_ref::<JobError>(), Some(JobError::Overflow { .. }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Run every task on the calling thread, in input order.
    Sequential,
    /// Run tasks on a dedicated pool; `None` uses one thread per CPU.
    Parallel { threads: Option<usize> },
}

impl ExecMode {
    /// A single worker thread means sequential execution. Without the `parallel-io`
    /// feature every job runs sequentially.
    #[must_use]
    pub fn from_threads(threads: Option<usize>) -> Self {
        if !cfg!(feature = "parallel-io") {
            return ExecMode::Sequential;
        }
        match threads {
            Some(1) => ExecMode::Sequential,
            threads => ExecMode::Parallel { threads },
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Counters summed over every successful map task.
    pub metrics: JobMetrics,
    /// Files whose map task failed on every attempt.
    pub failed_files: Vec<PathBuf>,
    /// Keys left out of the output because their total overflowed (`drop` policy).
    pub dropped_keys: Vec<String>,
    /// Keys whose total overflowed and was clamped (`saturate` policy).
    pub saturated_keys: u64,
    /// Final partition files, in bucket order.
    pub partitions: Vec<PathBuf>,
    /// Lines written across all partitions.
    pub keys_written: u64,
}

struct ReduceOutcome {
    path: PathBuf,
    keys_written: u64,
    saturated: u64,
    dropped: Vec<String>,
}

/// Executes map and reduce tasks for one job.
pub struct Runner {
    pool: Option<rayon::ThreadPool>,
    retry: RetryConfig,
    task_timeout: Duration,
    num_reducers: usize,
    combine: bool,
    combiner: BoundedSum,
    codec: Option<Arc<dyn CompressionCodec>>,
}

impl Runner {
    /// Runner for `config`, writing partitions through `codec` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be built.
    pub fn new(
        config: &JobConfig,
        codec: Option<Arc<dyn CompressionCodec>>,
    ) -> Result<Self, JobError> {
        let pool = match ExecMode::from_threads(config.threads) {
            ExecMode::Sequential => None,
            ExecMode::Parallel { threads } => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads.unwrap_or_else(num_cpus::get).max(1))
                    .thread_name(|i| format!("traitor-worker-{i}"))
                    .build()
                    .map_err(|e| anyhow!("building worker pool: {e}"))?,
            ),
        };
        Ok(Self {
            pool,
            retry: RetryConfig::for_job(config),
            task_timeout: config.task_timeout,
            num_reducers: config.num_reducers,
            combine: config.combine,
            combiner: BoundedSum::new(config.overflow_policy),
            codec,
        })
    }

    /// Map `files`, shuffle, reduce into `output`, and mark the output complete.
    ///
    /// `input` is the configured input root; it is consulted when a map task fails to tell a
    /// lost file apart from a lost input.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InputVanished`] if the input root disappears mid-run,
    /// [`JobError::Overflow`] under the `fail` overflow policy, or [`JobError::Task`] if a
    /// reduce task keeps failing.
    pub fn run(
        &self,
        input: &Path,
        files: &[ArchiveFile],
        mapper: &RecordMapper,
        output: &Path,
    ) -> Result<RunOutcome, JobError> {
        let map_start = Instant::now();
        let results: Vec<(PathBuf, Result<(JobMetrics, MapOutput)>)> = match &self.pool {
            Some(pool) => pool.install(|| {
                files
                    .par_iter()
                    .map(|f| (f.path.clone(), self.map_task(mapper, &f.path)))
                    .collect()
            }),
            None => files
                .iter()
                .map(|f| (f.path.clone(), self.map_task(mapper, &f.path)))
                .collect(),
        };

        // Barrier: every map task is done before anything is routed.
        let mut outcome = RunOutcome::default();
        let mut shuffle = ShuffleBuckets::new(self.num_reducers);
        for (path, result) in results {
            match result {
                Ok((metrics, map_output)) => {
                    outcome.metrics.merge(&metrics);
                    shuffle.route(map_output);
                }
                Err(e) => {
                    if expand_roots(input).is_err() {
                        return Err(JobError::InputVanished { path: input.to_path_buf() });
                    }
                    warn!(
                        path = %path.display(),
                        attempts = self.retry.max_attempts,
                        error = format!("{e:#}"),
                        "map task failed; skipping file"
                    );
                    outcome.failed_files.push(path);
                }
            }
        }
        info!(
            phase = "map",
            files = files.len(),
            failed = outcome.failed_files.len(),
            pairs = shuffle.total_pairs(),
            elapsed_ms = map_start.elapsed().as_millis(),
            "map phase finished"
        );

        let reduce_start = Instant::now();
        let buckets: Vec<(usize, Bucket)> = shuffle.into_buckets().into_iter().enumerate().collect();
        let reduced: Vec<Result<ReduceOutcome, JobError>> = self.reduce_all(&buckets, output);
        for result in reduced {
            let r = result?;
            outcome.keys_written += r.keys_written;
            outcome.saturated_keys += r.saturated;
            outcome.dropped_keys.extend(r.dropped);
            outcome.partitions.push(r.path);
        }
        commit_output(output)?;
        info!(
            phase = "reduce",
            partitions = outcome.partitions.len(),
            keys = outcome.keys_written,
            saturated = outcome.saturated_keys,
            dropped = outcome.dropped_keys.len(),
            elapsed_ms = reduce_start.elapsed().as_millis(),
            "reduce phase finished"
        );
        Ok(outcome)
    }

    fn reduce_all(
        &self,
        buckets: &[(usize, Bucket)],
        output: &Path,
    ) -> Vec<Result<ReduceOutcome, JobError>> {
        match &self.pool {
            Some(pool) => pool.install(|| {
                buckets
                    .par_iter()
                    .map(|(idx, bucket)| self.reduce_task(*idx, bucket, output))
                    .collect()
            }),
            None => buckets
                .iter()
                .map(|(idx, bucket)| self.reduce_task(*idx, bucket, output))
                .collect(),
        }
    }

    fn map_task(&self, mapper: &RecordMapper, path: &Path) -> Result<(JobMetrics, MapOutput)> {
        retry_with_backoff(&self.retry, is_retryable, |attempt| {
            let started = Instant::now();
            let mut metrics = JobMetrics::new();
            let output = if self.combine {
                let mut local: HashMap<String, BoundedAcc> = HashMap::new();
                mapper.map_file(path, &mut metrics, |key, value| {
                    self.combiner.add_input(local.entry(key).or_default(), value);
                })?;
                MapOutput::Combined(local)
            } else {
                let mut raw = Vec::new();
                mapper.map_file(path, &mut metrics, |key, value| raw.push((key, value)))?;
                MapOutput::Raw(raw)
            };
            self.check_timeout("map", &path.display().to_string(), attempt, started);
            debug!(file = %path.display(), attempt, pairs = output.len(), "map task finished");
            Ok((metrics, output))
        })
    }

    fn reduce_task(
        &self,
        index: usize,
        bucket: &Bucket,
        output: &Path,
    ) -> Result<ReduceOutcome, JobError> {
        retry_with_backoff(&self.retry, is_retryable, |attempt| {
            let started = Instant::now();
            let outcome = self.write_partition(index, bucket, output)?;
            self.check_timeout("reduce", &index.to_string(), attempt, started);
            Ok(outcome)
        })
        .map_err(|err| match err.downcast::<JobError>() {
            Ok(job_err) => job_err,
            Err(err) => JobError::Task {
                phase: "reduce",
                task: format!("{index:05}"),
                attempts: self.retry.max_attempts,
                reason: format!("{err:#}"),
            },
        })
    }

    /// Aggregate one bucket and write it as partition `index`.
    fn write_partition(&self, index: usize, bucket: &Bucket, output: &Path) -> Result<ReduceOutcome> {
        let sum = &self.combiner;
        let mut totals: HashMap<&str, BoundedAcc> = HashMap::with_capacity(bucket.partials.len());
        for (key, acc) in &bucket.partials {
            sum.merge(totals.entry(key.as_str()).or_default(), *acc);
        }

        // Uncombined values: sort by key, then build one accumulator per group.
        let mut raw: Vec<(&str, i64)> = bucket.raw.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        raw.sort_by(|a, b| a.0.cmp(b.0));
        for group in raw.chunk_by(|a, b| a.0 == b.0) {
            let values: Vec<i64> = group.iter().map(|(_, v)| *v).collect();
            sum.merge(totals.entry(group[0].0).or_default(), sum.build_from_group(&values));
        }

        let mut keys: Vec<(&str, BoundedAcc)> = totals.into_iter().collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut writer = PartitionWriter::create(output, index, self.codec.as_ref())?;
        let mut saturated = 0;
        let mut dropped = Vec::new();
        for (key, acc) in keys {
            match sum.finish(acc) {
                BoundedValue::Exact(v) => writer.write_pair(key, v)?,
                BoundedValue::Saturated(v) => {
                    warn!(key, total = %acc.total(), written = v, "sum overflowed; clamped");
                    saturated += 1;
                    writer.write_pair(key, v)?;
                }
                BoundedValue::Dropped => {
                    warn!(key, total = %acc.total(), "sum overflowed; key dropped");
                    dropped.push(key.to_string());
                }
                BoundedValue::Overflowed => {
                    return Err(JobError::Overflow { key: key.to_string() }.into());
                }
            }
        }
        let keys_written = writer.lines();
        let path = writer.finish()?;
        debug!(partition = index, keys = keys_written, path = %path.display(), "partition written");
        Ok(ReduceOutcome { path, keys_written, saturated, dropped })
    }

    fn check_timeout(&self, phase: &str, task: &str, attempt: u32, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.task_timeout {
            warn!(
                phase,
                task,
                attempt,
                elapsed_ms = elapsed.as_millis(),
                timeout_ms = self.task_timeout.as_millis(),
                "task ran past its timeout"
            );
        }
    }
}
