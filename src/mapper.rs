//! Record mapper: archive file → `(key, value)` emissions plus counters.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::archive::{ArchiveReader, ArchiveRecord};
use crate::metrics::{Counter, JobMetrics};

/// Runs the analyzer over every record of an archive file.
///
/// Analyzer failures (errors and panics) are isolated to their record. Reader failures end
/// the file and are returned to the caller, which decides what the loss means for the job.
#[derive(Clone)]
pub struct RecordMapper {
    reader: Arc<dyn ArchiveReader>,
    analyzer: Arc<dyn Analyzer>,
}

impl RecordMapper {
    pub fn new(reader: Arc<dyn ArchiveReader>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self { reader, analyzer }
    }

    /// Map every record of `path`, passing each emission to `emit`.
    ///
    /// Returns the number of records read. Counters for records read before a failure have
    /// already been applied to `metrics`; callers that retry should hand in a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a record cannot be decoded.
    pub fn map_file<F>(&self, path: &Path, metrics: &mut JobMetrics, mut emit: F) -> Result<u64>
    where
        F: FnMut(String, i64),
    {
        let records = self
            .reader
            .open(path)
            .with_context(|| format!("open archive {}", path.display()))?;

        let mut read = 0u64;
        for record in records {
            let record = record
                .with_context(|| format!("read record {read} of {}", path.display()))?;
            self.map_record(&record, metrics, &mut emit);
            read += 1;
        }
        debug!(path = %path.display(), records = read, "archive mapped");
        Ok(read)
    }

    /// Map a single record. Never fails: problems are counted and logged.
    pub fn map_record<F>(&self, record: &ArchiveRecord, metrics: &mut JobMetrics, emit: &mut F)
    where
        F: FnMut(String, i64),
    {
        metrics.increment(Counter::RecordsIn);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.analyzer.analyze(record)))
            .unwrap_or_else(|payload| {
                Err(anyhow!("analyzer panicked: {}", panic_message(payload.as_ref())))
            });

        match outcome {
            Ok(pairs) if pairs.is_empty() => metrics.increment(Counter::EmptyPageText),
            Ok(pairs) => {
                for (key, value) in pairs {
                    emit(key, value);
                }
            }
            Err(e) => {
                metrics.increment(Counter::Exceptions);
                warn!(
                    source = %record.header.source.display(),
                    ordinal = record.header.ordinal,
                    url = record.header.url.as_deref().unwrap_or("-"),
                    error = %e,
                    "analyzer failed on record; skipping"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::FnAnalyzer;
    use crate::archive::RecordHeader;
    use crate::testing::MockArchiveReader;
    use anyhow::bail;

    fn record(text: &str) -> ArchiveRecord {
        ArchiveRecord::new(RecordHeader::default(), text)
    }

    #[test]
    fn counts_every_outcome() -> Result<()> {
        let reader = MockArchiveReader::new().with_records(
            "a.arc.gz",
            vec![record("foo 3"), record(""), record("boom"), record("foo 4")],
        );
        let analyzer = FnAnalyzer(|r: &ArchiveRecord| -> Result<Vec<(String, i64)>> {
            let text = r.text();
            if text == "boom" {
                bail!("bad markup");
            }
            Ok(text
                .split_once(' ')
                .map(|(k, v)| vec![(k.to_string(), v.parse::<i64>().unwrap_or(0))])
                .unwrap_or_default())
        });
        let mapper = RecordMapper::new(Arc::new(reader), Arc::new(analyzer));

        let mut metrics = JobMetrics::new();
        let mut emitted = Vec::new();
        let read = mapper.map_file(Path::new("a.arc.gz"), &mut metrics, |k, v| emitted.push((k, v)))?;

        assert_eq!(read, 4);
        assert_eq!(emitted, vec![("foo".to_string(), 3), ("foo".to_string(), 4)]);
        assert_eq!(metrics.get(Counter::RecordsIn), 4);
        assert_eq!(metrics.get(Counter::EmptyPageText), 1);
        assert_eq!(metrics.get(Counter::Exceptions), 1);
        Ok(())
    }

    #[test]
    fn analyzer_panic_is_counted_not_propagated() {
        let analyzer = FnAnalyzer(|_: &ArchiveRecord| -> Result<Vec<(String, i64)>> {
            panic!("index out of bounds")
        });
        let mapper = RecordMapper::new(Arc::new(MockArchiveReader::new()), Arc::new(analyzer));
        let mut metrics = JobMetrics::new();
        mapper.map_record(&record("x"), &mut metrics, &mut |_, _| {});
        assert_eq!(metrics.get(Counter::Exceptions), 1);
        assert_eq!(metrics.get(Counter::RecordsIn), 1);
    }
}
