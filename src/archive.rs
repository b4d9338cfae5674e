//! Interface to archive decoding.
//!
//! The job never looks inside the container format. It asks an [`ArchiveReader`] for the
//! records of one file and hands each [`ArchiveRecord`] to the analyzer.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::io::compression::auto_detect_reader;

/// Metadata that precedes a record's payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Source URL of the captured document, when the format carries one.
    pub url: Option<String>,
    /// Declared content type, when the format carries one.
    pub content_type: Option<String>,
    /// Capture date as written in the archive.
    pub date: Option<String>,
    /// Archive file the record came from.
    pub source: PathBuf,
    /// Zero-based position of the record within its file.
    pub ordinal: u64,
}

/// One document read from an archive file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl ArchiveRecord {
    pub fn new(header: RecordHeader, payload: impl Into<Vec<u8>>) -> Self {
        Self { header, payload: payload.into() }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Records of a single archive file, yielded lazily.
///
/// An `Err` item means the rest of the file is unreadable.
pub type RecordIter = Box<dyn Iterator<Item = Result<ArchiveRecord>> + Send>;

/// Opens archive files and iterates their records.
pub trait ArchiveReader: Send + Sync {
    /// Open `path` and return its records.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its framing is unreadable.
    fn open(&self, path: &Path) -> Result<RecordIter>;
}

/// Treats every non-empty line of a file as one record.
///
/// Compressed files are decompressed based on their extension or magic bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineArchiveReader;

impl ArchiveReader for LineArchiveReader {
    fn open(&self, path: &Path) -> Result<RecordIter> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let reader = BufReader::new(auto_detect_reader(file, path)?);
        let source = path.to_path_buf();
        let mut ordinal = 0u64;

        let iter = reader
            .lines()
            .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .map(move |line| {
                let line = line.with_context(|| format!("read {}", source.display()))?;
                let header = RecordHeader {
                    source: source.clone(),
                    ordinal,
                    ..RecordHeader::default()
                };
                ordinal += 1;
                Ok(ArchiveRecord::new(header, line))
            });
        Ok(Box::new(iter))
    }
}
