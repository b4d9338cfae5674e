//! Output directory preparation and partition files.

use anyhow::Result;
use std::fs;
use tempfile::TempDir;
use traitor::JobError;
use traitor::io::output::{
    PartitionWriter, SUCCESS_MARKER, commit_output, partition_file_name, partition_files,
    prepare_output_dir, read_output,
};

#[test]
fn existing_output_without_overwrite_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out");
    fs::create_dir(&out)?;
    fs::write(out.join("part-r-00000"), "old\t1\n")?;

    let err = prepare_output_dir(&out, false).unwrap_err();
    assert!(matches!(err, JobError::OutputExists { .. }));
    assert!(err.to_string().contains("--overwrite"));
    assert_eq!(fs::read_to_string(out.join("part-r-00000"))?, "old\t1\n");
    Ok(())
}

#[test]
fn overwrite_removes_everything_first() -> Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out");
    fs::create_dir_all(out.join("nested"))?;
    fs::write(out.join("part-r-00000"), "old\t1\n")?;
    fs::write(out.join("nested/file"), "x")?;

    prepare_output_dir(&out, true)?;
    assert!(out.is_dir());
    assert!(partition_files(&out)?.is_empty());
    assert!(!out.join("nested").exists());
    Ok(())
}

#[test]
fn overwrite_replaces_a_plain_file() -> Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out");
    fs::write(&out, "not a directory")?;
    prepare_output_dir(&out, true)?;
    assert!(out.is_dir());
    Ok(())
}

#[test]
fn partition_names_are_zero_padded() {
    assert_eq!(partition_file_name(0, None), "part-r-00000");
    assert_eq!(partition_file_name(59, Some(".gz")), "part-r-00059.gz");
}

#[test]
fn partitions_appear_only_when_finished() -> Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out");
    prepare_output_dir(&out, false)?;

    let mut writer = PartitionWriter::create(&out, 3, None)?;
    writer.write_pair("bar", 2)?;
    writer.write_pair("foo", 12)?;
    assert_eq!(writer.lines(), 2);
    assert!(partition_files(&out)?.is_empty());

    let path = writer.finish()?;
    assert_eq!(path, out.join("part-r-00003"));
    assert_eq!(fs::read_to_string(&path)?, "bar\t2\nfoo\t12\n");

    commit_output(&out)?;
    assert!(out.join(SUCCESS_MARKER).exists());
    assert!(!out.join("_temporary").exists());
    assert_eq!(
        read_output(&out)?,
        vec![("bar".to_string(), 2), ("foo".to_string(), 12)]
    );
    Ok(())
}

#[test]
fn keys_with_tabs_split_on_the_last_one() -> Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out");
    prepare_output_dir(&out, false)?;
    let mut writer = PartitionWriter::create(&out, 0, None)?;
    writer.write_pair("a\tb", -4)?;
    writer.finish()?;
    assert_eq!(read_output(&out)?, vec![("a\tb".to_string(), -4)]);
    Ok(())
}

#[test]
fn malformed_partition_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("part-r-00000"), "no tab here\n")?;
    assert!(read_output(dir.path()).is_err());
    Ok(())
}
