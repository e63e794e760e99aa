//! Deleting, moving and measuring parts of the final layout.

use anyhow::{Context, Result};
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::copy_tree;

/// Delete every file under `dir` whose name matches `pattern`, recursively.
///
/// Returns the removed paths. A missing `dir` removes nothing.
pub fn remove_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;
    let mut removed = Vec::new();
    if !dir.exists() {
        return Ok(removed);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if !pattern.matches(&entry.file_name().to_string_lossy()) {
            continue;
        }
        fs::remove_file(entry.path())
            .with_context(|| format!("removing {}", entry.path().display()))?;
        removed.push(entry.into_path());
    }

    debug!(dir = %dir.display(), pattern = %pattern, removed = removed.len(), "pruned");
    Ok(removed)
}

/// Remove a directory tree, treating absence as success.
///
/// Other failures are logged and swallowed; returns whether anything was removed.
pub fn remove_dir_best_effort(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), "could not remove: {}", e);
            false
        }
    }
}

/// Move `src` to `dst`, copying across filesystems when a rename is refused.
///
/// `dst` must not exist; its parent is created.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    copy_tree(src, dst, true, None)
        .into_result()
        .with_context(|| format!("moving {} to {}", src.display(), dst.display()))?;
    fs::remove_dir_all(src).with_context(|| format!("removing {}", src.display()))?;
    Ok(())
}

/// File, directory and symlink counts plus total file size of a tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

impl TreeStats {
    /// Measure everything below `root` (not counting `root` itself).
    pub fn collect(root: &Path) -> Result<Self> {
        let mut stats = Self::default();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.with_context(|| format!("walking {}", root.display()))?;
            let kind = entry.file_type();
            if kind.is_symlink() {
                stats.symlinks += 1;
            } else if kind.is_dir() {
                stats.dirs += 1;
            } else {
                stats.files += 1;
                stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_remove_files_recursive() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::write(root.join("a.pyc"), "").unwrap();
        fs::write(root.join("a.py"), "").unwrap();
        fs::write(root.join("pkg/sub/b.pyc"), "").unwrap();

        let removed = remove_files(root, "*.pyc").unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!root.join("pkg/sub/b.pyc").exists());
        assert!(root.join("a.py").exists());
    }

    #[test]
    fn test_remove_files_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(remove_files(&dir.path().join("gone"), "pip*").unwrap().is_empty());
    }

    #[test]
    fn test_remove_dir_best_effort() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        fs::create_dir_all(target.join("x")).unwrap();

        assert!(remove_dir_best_effort(&target));
        assert!(!target.exists());
        assert!(!remove_dir_best_effort(&target));
    }

    #[test]
    fn test_move_dir_creates_parent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("site-packages");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("mod.py"), "x").unwrap();
        let dst = dir.path().join("python/Lib/site-packages");

        move_dir(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("mod.py")).unwrap(), "x");
    }

    #[test]
    fn test_tree_stats() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/one"), "12345").unwrap();
        fs::write(dir.path().join("a/b/two"), "67").unwrap();

        let stats = TreeStats::collect(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.bytes, 7);
    }
}
