//! Pluggable compression for archive input and partition output.
//!
//! Codecs are looked up by file extension first and by magic bytes second. Readers are
//! wrapped transparently; writers are wrapped in a [`FinishWrite`] so the trailer of a
//! compressed stream is written (and its errors reported) before a partition counts as done.
//!
//! ## Built-in Codecs
//!
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//!
//! ```no_run
//! use traitor::io::compression::{auto_detect_reader, codec_named};
//! use std::fs::File;
//! use std::io::Write;
//! # fn main() -> anyhow::Result<()> {
//! let reader = auto_detect_reader(File::open("segment-00000.arc.gz")?, "segment-00000.arc.gz")?;
//!
//! let gzip = codec_named("gzip").expect("gzip enabled");
//! let mut out = gzip.wrap_writer_dyn(Box::new(File::create("part-r-00000.gz")?))?;
//! out.write_all(b"foo\t12\n")?;
//! out.finish()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// Readers handed out by the codec layer.
pub type DynRead = Box<dyn Read + Send>;

/// A writer that must be explicitly finished to produce a complete stream.
pub trait FinishWrite: Write + Send {
    /// Flush buffered data and write any stream trailer.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the final write fails.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write + Send> FinishWrite for BufWriter<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

static CODEC_REGISTRY: LazyLock<Vec<Arc<dyn CompressionCodec>>> = LazyLock::new(builtin_codecs);

fn builtin_codecs() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
    ]
}

/// Pluggable compression codec.
///
/// Codecs are shared by every worker thread.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// File extensions associated with this codec, leading dot included.
    ///
    /// The first one is used when naming output partitions.
    fn extensions(&self) -> &[&str];

    /// Optional magic byte signature for content-based detection.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: DynRead) -> io::Result<DynRead>;

    /// Wrap a writer with compression.
    fn wrap_writer_dyn(&self, writer: Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>>;
}

/// Look up a registered codec by name (case-insensitive).
#[must_use]
pub fn codec_named(name: &str) -> Option<Arc<dyn CompressionCodec>> {
    CODEC_REGISTRY.iter().find(|c| c.name().eq_ignore_ascii_case(name)).cloned()
}

fn detect_from_extension(path: impl AsRef<Path>) -> Option<Arc<dyn CompressionCodec>> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    CODEC_REGISTRY
        .iter()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
        .cloned()
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn CompressionCodec>> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    CODEC_REGISTRY
        .iter()
        .find(|codec| codec.magic_bytes().is_some_and(|magic| buf.starts_with(magic)))
        .cloned()
}

/// Wrap `reader` with decompression when the path or the leading bytes call for it.
///
/// # Errors
///
/// Returns an error if the selected codec cannot initialize its decoder.
pub fn auto_detect_reader<R: Read + Send + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<DynRead> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_reader_dyn(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buf_reader = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buf_reader) {
        return codec
            .wrap_reader_dyn(Box::new(buf_reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    Ok(Box::new(buf_reader))
}

/// Wrap `writer` with the codec its path extension names, or just buffer it.
///
/// # Errors
///
/// Returns an error if the selected codec cannot initialize its encoder.
pub fn auto_detect_writer<W: Write + Send + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn FinishWrite>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_writer_dyn(Box::new(writer))
            .with_context(|| format!("wrap writer with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
/// Gzip via `flate2`.
pub struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl<W: Write + Send> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        flate2::write::GzEncoder::finish(*self)?.flush()
    }
}

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader_dyn(&self, reader: DynRead) -> io::Result<DynRead> {
        // Archives are concatenated gzip members; a plain GzDecoder stops after the first.
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(BufWriter::new(writer), Compression::default())))
    }
}

#[cfg(feature = "compression-zstd")]
/// Zstandard via `zstd`, level 3.
pub struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl<W: Write + Send> FinishWrite for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        zstd::stream::write::Encoder::finish(*self)?.flush()
    }
}

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader_dyn(&self, reader: DynRead) -> io::Result<DynRead> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as DynRead)
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn Write + Send>) -> io::Result<Box<dyn FinishWrite>> {
        zstd::stream::write::Encoder::new(BufWriter::new(writer), 3)
            .map(|e| Box::new(e) as Box<dyn FinishWrite>)
    }
}
