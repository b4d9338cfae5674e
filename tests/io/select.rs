//! Input discovery: suffix filter, sampling cap, traversal.

use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;
use traitor::JobError;
use traitor::io::select::InputSelector;
use traitor::testing::{archive_tree, touch_files};

fn names(files: &[traitor::ArchiveFile]) -> Vec<String> {
    files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn suffix_filter_picks_archives_only() -> Result<()> {
    let dir = archive_tree(&["a.arc.gz", "b.arc.gz", "c.txt"])?;

    let files = InputSelector::new(".arc.gz", 0).select(dir.path())?;
    assert_eq!(names(&files), vec!["a.arc.gz", "b.arc.gz"]);
    Ok(())
}

#[test]
fn cap_accepts_min_of_candidates_and_cap() -> Result<()> {
    let dir = TempDir::new()?;
    let all: Vec<String> = (0..7).map(|i| format!("seg-{i:02}.arc.gz")).collect();
    let refs: Vec<&str> = all.iter().map(String::as_str).collect();
    touch_files(dir.path(), &refs)?;
    touch_files(dir.path(), &["notes.txt", "seg-99.arc"])?;

    for (cap, expected) in [(0, 7), (1, 1), (3, 3), (7, 7), (50, 7)] {
        let files = InputSelector::new(".arc.gz", cap).select(dir.path())?;
        assert_eq!(files.len(), expected, "cap {cap}");
        assert!(files.iter().all(|f| f.path.to_string_lossy().ends_with(".arc.gz")));
    }
    Ok(())
}

#[test]
fn selection_is_deterministic_and_recursive() -> Result<()> {
    let dir = TempDir::new()?;
    touch_files(
        dir.path(),
        &["2012/b.arc.gz", "2012/a.arc.gz", "2013/x/c.arc.gz", "top.arc.gz"],
    )?;

    let first = InputSelector::new(".arc.gz", 0).select(dir.path())?;
    let second = InputSelector::new(".arc.gz", 0).select(dir.path())?;
    assert_eq!(first, second);
    assert_eq!(names(&first), vec!["a.arc.gz", "b.arc.gz", "c.arc.gz", "top.arc.gz"]);

    let capped = InputSelector::new(".arc.gz", 2).select(dir.path())?;
    assert_eq!(names(&capped), vec!["a.arc.gz", "b.arc.gz"]);
    Ok(())
}

#[test]
fn directories_and_bookkeeping_files_are_never_selected() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir(dir.path().join("odd.arc.gz"))?;
    touch_files(
        dir.path(),
        &["_SUCCESS", ".hidden.arc.gz", "_temporary/part.arc.gz", "real.arc.gz"],
    )?;

    let files = InputSelector::new(".arc.gz", 0).select(dir.path())?;
    assert_eq!(names(&files), vec!["real.arc.gz"]);
    Ok(())
}

#[test]
fn single_file_root_is_accepted() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = touch_files(dir.path(), &["only.arc.gz"])?;
    let files = InputSelector::new(".arc.gz", 0).select(&paths[0])?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, paths[0]);
    Ok(())
}

#[test]
fn glob_roots_are_expanded() -> Result<()> {
    let dir = TempDir::new()?;
    touch_files(dir.path(), &["2012/a.arc.gz", "2013/b.arc.gz", "misc/c.arc.gz"])?;

    let pattern = dir.path().join("201*");
    let files = InputSelector::new(".arc.gz", 0).select(&pattern)?;
    assert_eq!(names(&files), vec!["a.arc.gz", "b.arc.gz"]);
    Ok(())
}

#[test]
fn missing_root_is_input_not_found() -> Result<()> {
    let dir = TempDir::new()?;
    let missing: PathBuf = dir.path().join("nope");
    let err = InputSelector::new(".arc.gz", 0).select(&missing).unwrap_err();
    assert!(matches!(err, JobError::InputNotFound { ref path } if *path == missing));

    let empty_glob = dir.path().join("nothing-*");
    let err = InputSelector::new(".arc.gz", 0).select(&empty_glob).unwrap_err();
    assert!(matches!(err, JobError::InputNotFound { .. }));
    Ok(())
}

#[test]
fn sizes_are_reported() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("a.arc.gz"), b"0123456789")?;
    let files = InputSelector::new(".arc.gz", 0).select(dir.path())?;
    assert_eq!(files[0].size, 10);
    assert!(files[0].modified.is_some());
    Ok(())
}
