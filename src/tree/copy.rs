//! Merging, best-effort directory copy.
//!
//! Unlike a plain recursive copy, [`copy_tree`] merges into an existing
//! destination and keeps going after per-entry failures. Every failure is
//! recorded as a [`CopyError`]; nothing already written is rolled back.

use filetime::FileTime;
use glob::Pattern;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// One entry that could not be copied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", src.display())]
pub struct CopyError {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub message: String,
}

/// A copy that was required to be clean was not.
#[derive(Debug, Error)]
#[error("{} entries failed to copy; first: {}", .errors.len(), .errors.first().map(|e| e.to_string()).unwrap_or_default())]
pub struct CopyFailed {
    pub errors: Vec<CopyError>,
}

/// Outcome of a [`copy_tree`] run.
#[derive(Debug, Default)]
pub struct CopyReport {
    /// Files and symlinks written.
    pub copied: usize,
    /// Failures in the order they happened.
    pub errors: Vec<CopyError>,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of entries copied, or every failure.
    pub fn into_result(self) -> Result<usize, CopyFailed> {
        if self.errors.is_empty() {
            Ok(self.copied)
        } else {
            Err(CopyFailed {
                errors: self.errors,
            })
        }
    }

    fn record(&mut self, src: &Path, dst: &Path, err: impl ToString) {
        self.errors.push(CopyError {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            message: err.to_string(),
        });
    }
}

/// Chooses which children of a directory to skip.
///
/// Receives the directory and all of its child names; returns the names to skip.
pub type IgnoreFn<'a> = dyn Fn(&Path, &[OsString]) -> HashSet<OsString> + 'a;

/// Ignore children whose names match any of the glob `patterns`.
pub fn ignore_patterns(patterns: &[&str]) -> impl Fn(&Path, &[OsString]) -> HashSet<OsString> {
    let patterns: Vec<Pattern> = patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect();
    move |_dir: &Path, names: &[OsString]| {
        names
            .iter()
            .filter(|name| {
                let name = name.to_string_lossy();
                patterns.iter().any(|p| p.matches(&name))
            })
            .cloned()
            .collect()
    }
}

/// Recursively copy `src` into `dst`, merging with whatever `dst` holds.
///
/// With `preserve_symlinks`, links are recreated rather than followed.
/// Top-level timestamps and permission bits are copied last; a platform
/// that cannot set them is not an error.
pub fn copy_tree(
    src: &Path,
    dst: &Path,
    preserve_symlinks: bool,
    ignore: Option<&IgnoreFn<'_>>,
) -> CopyReport {
    let mut report = CopyReport::default();
    copy_dir(src, dst, preserve_symlinks, ignore, &mut report);
    debug!(
        src = %src.display(),
        dst = %dst.display(),
        copied = report.copied,
        errors = report.errors.len(),
        "copy_tree"
    );
    report
}

fn copy_dir(
    src: &Path,
    dst: &Path,
    preserve_symlinks: bool,
    ignore: Option<&IgnoreFn<'_>>,
    report: &mut CopyReport,
) {
    let names = match list_names(src) {
        Ok(names) => names,
        Err(e) => {
            report.record(src, dst, e);
            return;
        }
    };
    let ignored = ignore.map(|f| f(src, names.as_slice())).unwrap_or_default();

    if let Err(e) = fs::create_dir_all(dst) {
        report.record(src, dst, e);
        return;
    }

    for name in &names {
        if ignored.contains(name) {
            continue;
        }
        let src_path = src.join(name);
        let dst_path = dst.join(name);

        let is_link = fs::symlink_metadata(&src_path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        let result = if preserve_symlinks && is_link {
            copy_symlink(&src_path, &dst_path)
        } else if src_path.is_dir() {
            copy_dir(&src_path, &dst_path, preserve_symlinks, ignore, report);
            continue;
        } else {
            copy_file(&src_path, &dst_path)
        };

        match result {
            Ok(()) => report.copied += 1,
            Err(e) => report.record(&src_path, &dst_path, e),
        }
    }

    match copy_metadata(src, dst) {
        Ok(()) => {}
        Err(e) if is_platform_incapability(&e) => {}
        Err(e) => report.record(src, dst, e),
    }
}

/// Child names of `dir`, sorted so the copy order is deterministic.
fn list_names(dir: &Path) -> io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    // Later copies take precedence over files and links already in the destination.
    if fs::symlink_metadata(dst).is_ok_and(|m| !m.is_dir()) {
        fs::remove_file(dst)?;
    }
    create_symlink(&target, src, dst)
}

#[cfg(unix)]
fn create_symlink(target: &Path, _src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(windows)]
fn create_symlink(target: &Path, src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}

/// Copy content, permission bits, and timestamps.
fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    let meta = fs::metadata(src)?;
    filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
}

fn copy_metadata(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    fs::set_permissions(dst, meta.permissions())
}

/// Windows cannot set access times on directories; other platforms may
/// report `Unsupported`.
fn is_platform_incapability(err: &io::Error) -> bool {
    cfg!(windows) || err.kind() == io::ErrorKind::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_into_missing_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a.txt"), "a");
        write(&src.join("sub/b.txt"), "b");

        let report = copy_tree(&src, &dir.path().join("dst"), false, None);

        assert!(report.is_clean());
        assert_eq!(report.copied, 2);
        assert_eq!(fs::read_to_string(dir.path().join("dst/sub/b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_merges_into_existing_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("new.txt"), "new");
        write(&src.join("shared/inner.txt"), "from-src");
        write(&dst.join("untouched.txt"), "keep");
        write(&dst.join("shared/other.txt"), "keep-too");
        write(&dst.join("shared/inner.txt"), "stale");

        let report = copy_tree(&src, &dst, false, None);

        assert!(report.is_clean());
        assert_eq!(fs::read_to_string(dst.join("untouched.txt")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(dst.join("shared/other.txt")).unwrap(), "keep-too");
        assert_eq!(fs::read_to_string(dst.join("shared/inner.txt")).unwrap(), "from-src");
        assert_eq!(fs::read_to_string(dst.join("new.txt")).unwrap(), "new");
    }

    #[test]
    fn test_ignored_names_are_skipped_with_their_subtrees() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("keep.py"), "x");
        write(&src.join("drop.pyc"), "x");
        write(&src.join("__pycache__/mod.pyc"), "x");

        let ignore = ignore_patterns(&["*.pyc", "__pycache__"]);
        let report = copy_tree(&src, &dst, false, Some(&ignore));

        assert!(report.is_clean());
        assert_eq!(report.copied, 1);
        assert!(dst.join("keep.py").exists());
        assert!(!dst.join("drop.pyc").exists());
        assert!(!dst.join("__pycache__").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_symlinks() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("real.txt"), "real");
        std::os::unix::fs::symlink("real.txt", src.join("link")).unwrap();

        let report = copy_tree(&src, &dst, true, None);

        assert!(report.is_clean());
        let meta = fs::symlink_metadata(dst.join("link")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), PathBuf::from("real.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_follows_symlinks_when_not_preserving() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("real.txt"), "real");
        std::os::unix::fs::symlink("real.txt", src.join("link")).unwrap();

        copy_tree(&src, &dst, false, None);

        let meta = fs::symlink_metadata(dst.join("link")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read_to_string(dst.join("link")).unwrap(), "real");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_does_not_stop_siblings() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src.join("a.txt"), "a");
        write(&src.join("nested/c.txt"), "c");
        write(&src.join("z.txt"), "z");
        // Dangling link: unreadable when followed, regardless of privileges.
        std::os::unix::fs::symlink("does-not-exist", src.join("broken")).unwrap();

        let report = copy_tree(&src, &dst, false, None);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].src, src.join("broken"));
        assert_eq!(report.errors[0].dst, dst.join("broken"));
        assert_eq!(report.copied, 3);
        assert!(dst.join("a.txt").exists());
        assert!(dst.join("nested/c.txt").exists());
        assert!(dst.join("z.txt").exists());

        let failed = report.into_result().unwrap_err();
        assert_eq!(failed.errors.len(), 1);
    }

    #[test]
    fn test_missing_source_is_recorded() {
        let dir = tempdir().unwrap();
        let report = copy_tree(&dir.path().join("nope"), &dir.path().join("dst"), false, None);
        assert_eq!(report.errors.len(), 1);
        assert!(!dir.path().join("dst").exists());
    }

    #[test]
    fn test_copies_file_mtime() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("old.txt"), "old");
        let stamp = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(src.join("old.txt"), stamp).unwrap();

        copy_tree(&src, &dir.path().join("dst"), false, None);

        let meta = fs::metadata(dir.path().join("dst/old.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }
}
