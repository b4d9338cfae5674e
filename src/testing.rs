//! Test doubles and fixtures.
//!
//! [`MockArchiveReader`] serves in-memory records keyed by file name, so a job can run over a
//! directory of empty placeholder files created with [`touch_files`] or [`archive_tree`].
//! Failures can be injected per file: permanently unreadable, failing mid-file, or failing
//! only for the first few opens (to exercise task retries).
//!
//! ```
//! use std::path::Path;
//! use traitor::archive::ArchiveReader;
//! use traitor::testing::MockArchiveReader;
//!
//! let reader = MockArchiveReader::new().with_texts("a.arc.gz", &["foo", "bar"]);
//! let records: Vec<_> = reader.open(Path::new("/data/a.arc.gz")).unwrap().collect();
//! assert_eq!(records.len(), 2);
//! assert_eq!(reader.open_count("a.arc.gz"), 1);
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::archive::{ArchiveReader, ArchiveRecord, RecordHeader, RecordIter};

#[derive(Clone)]
enum MockFile {
    Records(Vec<ArchiveRecord>),
    FailOpen,
    FailAfter { records: Vec<ArchiveRecord>, after: usize },
    Flaky { records: Vec<ArchiveRecord>, failures: u32 },
}

#[derive(Default)]
struct MockState {
    files: HashMap<String, MockFile>,
    opens: HashMap<String, u32>,
}

/// In-memory [`ArchiveReader`] keyed by file name.
#[derive(Clone, Default)]
pub struct MockArchiveReader {
    state: Arc<Mutex<MockState>>,
}

impl MockArchiveReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(self, name: &str, file: MockFile) -> Self {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .insert(name.to_string(), file);
        self
    }

    /// Serve `records` for the file called `name`.
    #[must_use]
    pub fn with_records(self, name: &str, records: Vec<ArchiveRecord>) -> Self {
        self.insert(name, MockFile::Records(records))
    }

    /// Serve one record per text for the file called `name`.
    #[must_use]
    pub fn with_texts(self, name: &str, texts: &[&str]) -> Self {
        let records = records_from_texts(name, texts);
        self.with_records(name, records)
    }

    /// Every open of `name` fails.
    #[must_use]
    pub fn failing_open(self, name: &str) -> Self {
        self.insert(name, MockFile::FailOpen)
    }

    /// `name` yields its first `after` records, then a read error.
    #[must_use]
    pub fn failing_after(self, name: &str, texts: &[&str], after: usize) -> Self {
        let records = records_from_texts(name, texts);
        self.insert(name, MockFile::FailAfter { records, after })
    }

    /// The first `failures` opens of `name` fail; later opens succeed.
    #[must_use]
    pub fn flaky(self, name: &str, texts: &[&str], failures: u32) -> Self {
        let records = records_from_texts(name, texts);
        self.insert(name, MockFile::Flaky { records, failures })
    }

    /// How many times `name` has been opened.
    #[must_use]
    pub fn open_count(&self, name: &str) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .opens
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl ArchiveReader for MockArchiveReader {
    fn open(&self, path: &Path) -> Result<RecordIter> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("unnamed path {}", path.display()))?
            .to_string();

        let mut state = self.state.lock().map_err(|_| anyhow!("mock state poisoned"))?;
        let opens = {
            let n = state.opens.entry(name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let Some(file) = state.files.get(&name).cloned() else {
            bail!("no such archive: {name}");
        };
        drop(state);

        match file {
            MockFile::Records(records) => {
                Ok(Box::new(records.into_iter().map(Ok::<_, anyhow::Error>)))
            }
            MockFile::FailOpen => bail!("corrupt archive header in {name}"),
            MockFile::Flaky { failures, .. } if opens <= failures => {
                bail!("transient read failure on {name} (open #{opens})")
            }
            MockFile::Flaky { records, .. } => {
                Ok(Box::new(records.into_iter().map(Ok::<_, anyhow::Error>)))
            }
            MockFile::FailAfter { records, after } => {
                let good = records.into_iter().take(after).map(Ok::<_, anyhow::Error>);
                let bad = std::iter::once(Err(anyhow!("truncated gzip member in {name}")));
                Ok(Box::new(good.chain(bad)))
            }
        }
    }
}

/// Records whose payloads are `texts`, in order, attributed to `source`.
#[must_use]
pub fn records_from_texts(source: &str, texts: &[&str]) -> Vec<ArchiveRecord> {
    texts
        .iter()
        .zip(0u64..)
        .map(|(text, ordinal)| {
            let header = RecordHeader {
                source: PathBuf::from(source),
                ordinal,
                ..RecordHeader::default()
            };
            ArchiveRecord::new(header, *text)
        })
        .collect()
}

/// Create empty files named `names` (relative paths allowed) under `dir`.
///
/// # Errors
///
/// Returns an error if a directory or file cannot be created.
pub fn touch_files(dir: &Path, names: &[&str]) -> Result<Vec<PathBuf>> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            File::create(&path)?;
            Ok(path)
        })
        .collect()
}

/// A fresh temporary directory holding empty files named `names`.
///
/// The directory is removed when the returned handle is dropped.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be created.
pub fn archive_tree(names: &[&str]) -> Result<TempDir> {
    let dir = TempDir::new()?;
    touch_files(dir.path(), names)?;
    Ok(dir)
}
