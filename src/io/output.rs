//! Output directory handling and partition files.
//!
//! Each aggregator worker writes one partition, `part-r-NNNNN` (plus the codec extension when
//! compressed), holding `key<TAB>value` lines sorted by key. A partition is written under
//! `_temporary/` and renamed into place when finished, so a re-run of the same reduce task
//! never leaves a half-written partition behind. A `_SUCCESS` marker is written last.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::error::JobError;
use crate::io::compression::{CompressionCodec, FinishWrite, auto_detect_reader};

pub const SUCCESS_MARKER: &str = "_SUCCESS";
const TEMP_DIR: &str = "_temporary";

/// Make `output` ready for a fresh run.
///
/// An existing location is removed recursively when `overwrite` is set; otherwise its
/// presence is an error. The removal is not undone if the job fails later.
///
/// # Errors
///
/// Returns [`JobError::OutputExists`] when `output` exists and `overwrite` is false, or an
/// I/O error if removal or creation fails.
pub fn prepare_output_dir(output: &Path, overwrite: bool) -> Result<(), JobError> {
    if output.exists() {
        if !overwrite {
            return Err(JobError::OutputExists { path: output.to_path_buf() });
        }
        info!(path = %output.display(), "clearing the output path");
        if output.is_dir() {
            fs::remove_dir_all(output)?;
        } else {
            fs::remove_file(output)?;
        }
    }
    fs::create_dir_all(output.join(TEMP_DIR))?;
    Ok(())
}

/// Partition file name for reducer `index`.
#[must_use]
pub fn partition_file_name(index: usize, extension: Option<&str>) -> String {
    format!("part-r-{index:05}{}", extension.unwrap_or(""))
}

/// Writer for a single output partition.
pub struct PartitionWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    inner: Box<dyn FinishWrite>,
    lines: u64,
}

impl PartitionWriter {
    /// Start partition `index` inside `dir`, compressed with `codec` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn create(
        dir: &Path,
        index: usize,
        codec: Option<&Arc<dyn CompressionCodec>>,
    ) -> Result<Self> {
        let ext = codec.and_then(|c| c.extensions().first().copied());
        let name = partition_file_name(index, ext);
        let temp_dir = dir.join(TEMP_DIR);
        fs::create_dir_all(&temp_dir)
            .with_context(|| format!("mkdir -p {}", temp_dir.display()))?;
        let temp_path = temp_dir.join(&name);
        let file = File::create(&temp_path)
            .with_context(|| format!("create {}", temp_path.display()))?;

        let inner: Box<dyn FinishWrite> = match codec {
            Some(c) => c
                .wrap_writer_dyn(Box::new(file))
                .with_context(|| format!("wrap {} with {} codec", temp_path.display(), c.name()))?,
            None => Box::new(std::io::BufWriter::new(file)),
        };
        Ok(Self { temp_path, final_path: dir.join(name), inner, lines: 0 })
    }

    /// Append one `key<TAB>value` line.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_pair(&mut self, key: &str, value: i64) -> Result<()> {
        writeln!(self.inner, "{key}\t{value}")
            .with_context(|| format!("write {}", self.temp_path.display()))?;
        self.lines += 1;
        Ok(())
    }

    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Finish the stream and move the partition to its final name.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written or the rename fails.
    pub fn finish(self) -> Result<PathBuf> {
        self.inner
            .finish()
            .with_context(|| format!("finish {}", self.temp_path.display()))?;
        fs::rename(&self.temp_path, &self.final_path).with_context(|| {
            format!("rename {} -> {}", self.temp_path.display(), self.final_path.display())
        })?;
        Ok(self.final_path)
    }
}

/// Drop the temporary area and write the `_SUCCESS` marker.
///
/// # Errors
///
/// Returns an error if the marker cannot be written.
pub fn commit_output(dir: &Path) -> Result<()> {
    let temp_dir = dir.join(TEMP_DIR);
    if temp_dir.exists() {
        fs::remove_dir_all(&temp_dir)
            .with_context(|| format!("remove {}", temp_dir.display()))?;
    }
    let marker = dir.join(SUCCESS_MARKER);
    File::create(&marker).with_context(|| format!("create {}", marker.display()))?;
    Ok(())
}

/// Partition files in `dir`, sorted by name.
///
/// # Errors
///
/// Returns an error if `dir` cannot be listed.
pub fn partition_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let path = entry?.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("part-"));
        if is_part && path.is_file() {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

/// Read every `key<TAB>value` line of every partition in `dir`.
///
/// # Errors
///
/// Returns an error if a partition cannot be read or a line is malformed.
pub fn read_output(dir: &Path) -> Result<Vec<(String, i64)>> {
    let mut out = Vec::new();
    for part in partition_files(dir)? {
        let file = File::open(&part).with_context(|| format!("open {}", part.display()))?;
        let reader = BufReader::new(auto_detect_reader(file, &part)?);
        for (idx, line) in reader.lines().enumerate() {
            let line =
                line.with_context(|| format!("read line {} in {}", idx + 1, part.display()))?;
            let Some((key, value)) = line.rsplit_once('\t') else {
                bail!("malformed line {} in {}: {line}", idx + 1, part.display());
            };
            let value: i64 = value
                .parse()
                .with_context(|| format!("parse value on line {} in {}", idx + 1, part.display()))?;
            out.push((key.to_string(), value));
        }
    }
    Ok(out)
}
