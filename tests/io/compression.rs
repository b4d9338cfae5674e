//! Codec lookup and compressed partitions.

use anyhow::Result;
use std::io::{Read, Write};
use tempfile::TempDir;
use traitor::io::compression::{auto_detect_reader, auto_detect_writer, codec_named};
use traitor::io::output::{PartitionWriter, read_output};

#[test]
fn unknown_codec_is_not_found() {
    assert!(codec_named("lz4-frame").is_none());
}

#[test]
fn uncompressed_files_pass_through() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("plain.txt");
    std::fs::write(&path, "foo\t1\n")?;
    let mut text = String::new();
    auto_detect_reader(std::fs::File::open(&path)?, &path)?.read_to_string(&mut text)?;
    assert_eq!(text, "foo\t1\n");
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_partitions_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let gzip = codec_named("GZIP").expect("gzip codec registered");
    let mut writer = PartitionWriter::create(dir.path(), 7, Some(&gzip))?;
    writer.write_pair("foo", 12)?;
    writer.write_pair("traitor", i64::MAX)?;
    let path = writer.finish()?;

    assert_eq!(path, dir.path().join("part-r-00007.gz"));
    assert_eq!(&std::fs::read(&path)?[..2], &[0x1f, 0x8b]);
    assert_eq!(
        read_output(dir.path())?,
        vec![("foo".to_string(), 12), ("traitor".to_string(), i64::MAX)]
    );
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn concatenated_gzip_members_are_read_in_full() -> Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut bytes = Vec::new();
    for member in ["first\n", "second\n"] {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(member.as_bytes())?;
        bytes.extend(enc.finish()?);
    }
    let dir = TempDir::new()?;
    let path = dir.path().join("seg.arc.gz");
    std::fs::write(&path, bytes)?;

    let mut text = String::new();
    auto_detect_reader(std::fs::File::open(&path)?, &path)?.read_to_string(&mut text)?;
    assert_eq!(text, "first\nsecond\n");
    Ok(())
}

#[cfg(feature = "compression-zstd")]
#[test]
fn zstd_is_detected_by_magic_bytes() -> Result<()> {
    let dir = TempDir::new()?;
    let zstd = codec_named("zstd").expect("zstd codec registered");
    let path = dir.path().join("data.zst");
    let mut out = zstd.wrap_writer_dyn(Box::new(std::fs::File::create(&path)?))?;
    out.write_all(b"bar\t3\n")?;
    out.finish()?;

    // No telling extension: detection falls back to the frame magic.
    let renamed = dir.path().join("data.bin");
    std::fs::rename(&path, &renamed)?;
    let mut text = String::new();
    auto_detect_reader(std::fs::File::open(&renamed)?, &renamed)?.read_to_string(&mut text)?;
    assert_eq!(text, "bar\t3\n");
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn writer_detection_follows_the_extension() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("out.gz");
    let mut w = auto_detect_writer(std::fs::File::create(&path)?, &path)?;
    w.write_all(b"x\t1\n")?;
    w.finish()?;
    assert_eq!(&std::fs::read(&path)?[..2], &[0x1f, 0x8b]);
    Ok(())
}
