//! Job counters.
//!
//! Mapper workers each own a [`JobMetrics`] and increment it without any locking. When a
//! task's output is committed its counters are folded into the job total with
//! [`JobMetrics::merge`], which is associative and commutative, so the final numbers do not
//! depend on task order or worker count.
//!
//! # Example
//!
//! ```
//! use traitor::metrics::{Counter, JobMetrics};
//!
//! let mut worker_a = JobMetrics::new();
//! worker_a.increment(Counter::RecordsIn);
//! let mut worker_b = JobMetrics::new();
//! worker_b.add(Counter::RecordsIn, 2);
//! worker_b.increment(Counter::Exceptions);
//!
//! let mut total = JobMetrics::new();
//! total.merge(&worker_a);
//! total.merge(&worker_b);
//! assert_eq!(total.get(Counter::RecordsIn), 3);
//! assert_eq!(total.get(Counter::Exceptions), 1);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The fixed set of per-job counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Counter {
    /// Records read from archive files.
    #[serde(rename = "RECORDS_IN")]
    RecordsIn,
    /// Records for which the analyzer emitted nothing.
    #[serde(rename = "EMPTY_PAGE_TEXT")]
    EmptyPageText,
    /// Records whose analysis failed.
    #[serde(rename = "EXCEPTIONS")]
    Exceptions,
}

impl Counter {
    pub const ALL: [Counter; 3] = [Counter::RecordsIn, Counter::EmptyPageText, Counter::Exceptions];

    /// Display name used in reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Counter::RecordsIn => "RECORDS_IN",
            Counter::EmptyPageText => "EMPTY_PAGE_TEXT",
            Counter::Exceptions => "EXCEPTIONS",
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Counter::RecordsIn => 0,
            Counter::EmptyPageText => 1,
            Counter::Exceptions => 2,
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Monotonic counter values for one worker, or for the whole job after merging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobMetrics {
    counts: [u64; 3],
}

impl JobMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    #[inline]
    pub fn add(&mut self, counter: Counter, n: u64) {
        let slot = &mut self.counts[counter.index()];
        *slot = slot.saturating_add(n);
    }

    #[inline]
    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()]
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &JobMetrics) {
        for c in Counter::ALL {
            self.add(c, other.get(c));
        }
    }

    /// Counter name → value, in name order.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL.iter().map(|c| (c.name(), self.get(*c))).collect()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!(self.snapshot())
    }

    /// Print the counters to stdout.
    pub fn print(&self) {
        println!("\n========== Job Counters ==========");
        for (name, value) in self.snapshot() {
            println!("{name}: {value}");
        }
        println!("==================================\n");
    }

    /// Save the counters as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
