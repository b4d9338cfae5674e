//! Per-record analysis.
//!
//! An [`Analyzer`] turns one archive record into zero or more `(key, count)` emissions. It
//! may fail on a record; the mapper counts and skips such records, so an analyzer never
//! needs to guard against taking the whole job down.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::archive::ArchiveRecord;

/// Analysis of a single document.
pub trait Analyzer: Send + Sync {
    /// Emissions for `record`. An empty vector means the page yielded no text of interest.
    ///
    /// # Errors
    ///
    /// Any error is counted against the record and logged; the job continues.
    fn analyze(&self, record: &ArchiveRecord) -> Result<Vec<(String, i64)>>;
}

/// Adapter that lets a closure act as an [`Analyzer`].
pub struct FnAnalyzer<F>(pub F);

impl<F> Analyzer for FnAnalyzer<F>
where
    F: Fn(&ArchiveRecord) -> Result<Vec<(String, i64)>> + Send + Sync,
{
    fn analyze(&self, record: &ArchiveRecord) -> Result<Vec<(String, i64)>> {
        (self.0)(record)
    }
}

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_']+").expect("word pattern compiles"));

/// Counts lower-cased word tokens; each occurrence emits `(word, 1)`.
///
/// Used by the command-line tool for smoke runs over line-oriented inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TermCountAnalyzer;

impl Analyzer for TermCountAnalyzer {
    fn analyze(&self, record: &ArchiveRecord) -> Result<Vec<(String, i64)>> {
        let text = record.text();
        Ok(WORD
            .find_iter(&text)
            .map(|m| (m.as_str().to_lowercase(), 1))
            .collect())
    }
}
