//! Input discovery and sampling.
//!
//! [`InputSelector`] walks an input root (a directory, a single file, or a glob pattern) and
//! accepts files whose names end in the configured suffix, up to an optional cap. The cap is a
//! [`SampleLimit`] owned by the selector: acceptance checks and increments it in one atomic
//! step, so the cap holds even when the filter runs on many threads at once.
//!
//! # Examples
//!
//! ```no_run
//! use traitor::io::select::InputSelector;
//!
//! // At most 10 archive files from the crawl directory.
//! let selector = InputSelector::new(".arc.gz", 10);
//! let files = selector.select("crawl/2012/segments")?;
//! assert!(files.len() <= 10);
//! # Ok::<(), traitor::JobError>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::JobError;

/// An input file accepted for processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Shared ceiling on the number of accepted files.
///
/// A maximum of `0` means unbounded.
#[derive(Debug, Default)]
pub struct SampleLimit {
    max: u64,
    accepted: AtomicU64,
}

impl SampleLimit {
    #[must_use]
    pub fn new(max: u64) -> Self {
        Self { max, accepted: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// The configured ceiling, or `None` when unbounded.
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        (self.max > 0).then_some(self.max)
    }

    /// Number of slots handed out so far.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Acquire)
    }

    /// Take one slot if any remain. Never hands out more than `max` slots in total.
    pub fn try_acquire(&self) -> bool {
        if self.max == 0 {
            self.accepted.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        self.accepted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }
}

/// Suffix filter plus sampling cap over an input root.
#[derive(Debug)]
pub struct InputSelector {
    suffix: String,
    limit: SampleLimit,
}

impl InputSelector {
    /// Accept files ending in `suffix`, at most `max_files` of them (`0` = no cap).
    pub fn new(suffix: impl Into<String>, max_files: u64) -> Self {
        Self { suffix: suffix.into(), limit: SampleLimit::new(max_files) }
    }

    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    #[must_use]
    pub fn limit(&self) -> &SampleLimit {
        &self.limit
    }

    /// Acceptance test for one candidate path.
    ///
    /// Non-matching names never consume a slot of the cap.
    pub fn accept(&self, path: &Path) -> bool {
        path.to_string_lossy().ends_with(&self.suffix) && self.limit.try_acquire()
    }

    /// Walk `input` and return the accepted files in traversal order.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InputNotFound`] if `input` does not exist, cannot be listed, or is a
    /// glob pattern that matches nothing.
    pub fn select(&self, input: impl AsRef<Path>) -> Result<Vec<ArchiveFile>, JobError> {
        let candidates = list_candidates(input.as_ref())?;
        let accepted: Vec<ArchiveFile> = candidates
            .into_iter()
            .filter(|f| self.accept(&f.path))
            .collect();
        debug!(accepted = accepted.len(), suffix = %self.suffix, "input selection finished");
        Ok(accepted)
    }
}

/// Expand `input` into the roots to traverse.
///
/// Paths containing glob metacharacters are expanded; anything else is taken literally.
pub fn expand_roots(input: &Path) -> Result<Vec<PathBuf>, JobError> {
    let not_found = || JobError::InputNotFound { path: input.to_path_buf() };
    let pattern = input.to_string_lossy();

    if !pattern.contains(['*', '?', '[']) {
        return if input.exists() { Ok(vec![input.to_path_buf()]) } else { Err(not_found()) };
    }

    let mut roots = Vec::new();
    for entry in glob::glob(&pattern).map_err(|_| not_found())? {
        match entry {
            Ok(path) => roots.push(path),
            Err(e) => warn!(error = %e, "skipping unreadable glob match"),
        }
    }
    roots.sort();
    if roots.is_empty() { Err(not_found()) } else { Ok(roots) }
}

/// Every regular file under `input`, in a deterministic order.
fn list_candidates(input: &Path) -> Result<Vec<ArchiveFile>, JobError> {
    let mut files = Vec::new();
    for root in expand_roots(input)? {
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(JobError::InputNotFound { path: root.clone() });
                }
                Err(e) => {
                    warn!(error = %e, "skipping unreadable input entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata().ok();
            files.push(ArchiveFile {
                path: entry.into_path(),
                size: meta.as_ref().map_or(0, |m| m.len()),
                modified: meta.and_then(|m| m.modified().ok()),
            });
        }
    }
    Ok(files)
}

/// Names starting with `.` or `_` are bookkeeping files, not input.
fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.') || name.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unbounded_limit_always_accepts() {
        let limit = SampleLimit::unbounded();
        assert!((0..1000).all(|_| limit.try_acquire()));
        assert_eq!(limit.max(), None);
        assert_eq!(limit.accepted(), 1000);
    }

    #[test]
    fn limit_is_exact_under_contention() {
        let limit = Arc::new(SampleLimit::new(37));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limit = Arc::clone(&limit);
                thread::spawn(move || (0..100).filter(|_| limit.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 37);
        assert_eq!(limit.accepted(), 37);
    }

    #[test]
    fn suffix_mismatch_does_not_use_the_cap() {
        let selector = InputSelector::new(".arc.gz", 1);
        assert!(!selector.accept(Path::new("a.txt")));
        assert!(!selector.accept(Path::new("a.arc.gz.tmp")));
        assert!(selector.accept(Path::new("a.arc.gz")));
        assert!(!selector.accept(Path::new("b.arc.gz")));
    }
}
