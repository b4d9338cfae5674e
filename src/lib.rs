//! # Traitor
//!
//! A sampled **map / combine / reduce** batch job over a corpus of web-archive files. Each
//! record of each archive is handed to an [`Analyzer`](analyzer::Analyzer) that emits
//! `(key, count)` pairs; the counts are summed per key, bounded to the `i64` range, and
//! written as `key<TAB>value` partitions.
//!
//! ## Key Features
//!
//! - **Sampling** - cap the number of input files for cheap runs over a subset of a crawl
//! - **Fault isolation** - a bad record or an unreadable file is counted and skipped
//! - **Local combining** - per-task pre-aggregation with the same rule as the final reduce
//! - **Bounded sums** - totals outside the `i64` range saturate, are dropped, or fail the job
//! - **Retries** - failed tasks are re-run with backoff and never double-count
//! - **Compressed output** - gzip or zstd partitions via feature flags
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use traitor::analyzer::TermCountAnalyzer;
//! use traitor::archive::LineArchiveReader;
//! use traitor::{Job, JobConfig};
//!
//! # fn main() -> Result<(), traitor::JobError> {
//! let config = JobConfig::new("crawl/segments", "out/traitor")
//!     .with_max_files(10)
//!     .with_overwrite(true);
//! let mut job = Job::new(config)?;
//! let report = job.run(Arc::new(LineArchiveReader), Arc::new(TermCountAnalyzer))?;
//! report.metrics.print();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. [`io::select`] discovers input files and applies the suffix filter and sampling cap
//! 2. [`mapper`] runs the analyzer over every record and keeps the job counters
//! 3. [`runner`] schedules map tasks, the [`shuffle`] barrier, and reduce tasks
//! 4. [`combiners`] holds the bounded-sum rule used on both sides of the shuffle
//! 5. [`io::output`] writes partitions and the `_SUCCESS` marker
//! 6. [`job`] ties it together as a small state machine
//!
//! ## Module Overview
//!
//! - [`analyzer`] - Per-record analysis trait and a word-count analyzer
//! - [`archive`] - Archive record model and readers
//! - [`combiners`] - `CombineFn` and the bounded sum
//! - [`config`] - Job settings and JSON overrides
//! - [`error`] - Job-level errors and exit codes
//! - [`io`] - Input selection, compression codecs, partition output
//! - [`metrics`] - Job counters
//! - [`testing`] - Mock archive reader and fixture helpers

pub mod analyzer;
pub mod archive;
pub mod combiners;
pub mod config;
pub mod error;
pub mod io;
pub mod job;
pub mod mapper;
pub mod metrics;
pub mod runner;
pub mod shuffle;
pub mod testing;

// General re-exports
pub use analyzer::{Analyzer, FnAnalyzer, TermCountAnalyzer};
pub use archive::{ArchiveReader, ArchiveRecord, LineArchiveReader, RecordHeader};
pub use combiners::{BoundedSum, BoundedValue, CombineFn, LiftableCombiner, OverflowPolicy};
pub use config::{ConfigOverrides, JobConfig};
pub use error::JobError;
pub use io::select::{ArchiveFile, InputSelector, SampleLimit};
pub use job::{Job, JobReport, JobState};
pub use mapper::RecordMapper;
pub use metrics::{Counter, JobMetrics};
pub use runner::{ExecMode, RetryConfig, Runner};
pub use shuffle::partition_for;

// Gated re-exports
#[cfg(feature = "compression-gzip")]
pub use io::compression::GzipCodec;

#[cfg(feature = "compression-zstd")]
pub use io::compression::ZstdCodec;
