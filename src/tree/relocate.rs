//! Shebang rewriting for installed launcher scripts.
//!
//! Installers write the absolute path of the build machine's interpreter
//! into the first line of every script they generate. Replacing it with a
//! fixed marker makes the scripts runnable from wherever the environment
//! is unpacked.

use anyhow::{Context, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of a [`make_relocatable`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelocateReport {
    /// Files matched by the pattern.
    pub matched: usize,
    /// Files whose first line was replaced.
    pub rewritten: Vec<PathBuf>,
}

/// Glob matching `name` inside `dir`, with `dir` escaped.
pub fn pattern_in(dir: &Path, name: &str) -> String {
    format!("{}/{}", Pattern::escape(&dir.to_string_lossy()), name)
}

/// Rewrite the shebang of every file matching `pattern` to `marker`.
pub fn make_relocatable(pattern: &str, marker: &str) -> Result<RelocateReport> {
    let mut report = RelocateReport::default();
    let paths = glob::glob(pattern).with_context(|| format!("invalid pattern '{}'", pattern))?;

    for entry in paths {
        let path = entry.context("reading glob match")?;
        if !path.is_file() {
            continue;
        }
        report.matched += 1;
        if relocate_file(&path, marker)? {
            report.rewritten.push(path);
        }
    }

    debug!(pattern, matched = report.matched, rewritten = report.rewritten.len(), "relocated");
    Ok(report)
}

/// Replace line 1 of `path` with `marker` if it is a foreign shebang.
///
/// Returns whether the file was written. Files already carrying `marker`
/// are left alone, so repeated passes are no-ops.
pub fn relocate_file(path: &Path, marker: &str) -> Result<bool> {
    let content = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let Some(rewritten) = rewrite_first_line(&content, marker) else {
        return Ok(false);
    };
    fs::write(path, rewritten).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

fn rewrite_first_line(content: &[u8], marker: &str) -> Option<Vec<u8>> {
    if !content.starts_with(b"#!") {
        return None;
    }
    let (line, rest) = match content.iter().position(|&b| b == b'\n') {
        Some(i) => content.split_at(i),
        None => (content, &[][..]),
    };
    let (line, cr) = match line.strip_suffix(b"\r") {
        Some(line) => (line, true),
        None => (line, false),
    };
    if line == marker.as_bytes() {
        return None;
    }

    let mut out = Vec::with_capacity(marker.len() + content.len());
    out.extend_from_slice(marker.as_bytes());
    if cr {
        out.push(b'\r');
    }
    if rest.is_empty() {
        out.push(b'\n');
    } else {
        out.extend_from_slice(rest);
    }
    Some(out)
}

/// Scripts under `scripts_dir` that still mention `build_root`.
///
/// An empty result means the launchers no longer depend on where the
/// environment was built.
pub fn verify_relocatable(scripts_dir: &Path, build_root: &Path) -> Result<Vec<PathBuf>> {
    let needle = build_root.to_string_lossy().into_owned();
    let mut offenders = Vec::new();

    for entry in fs::read_dir(scripts_dir)
        .with_context(|| format!("reading {}", scripts_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = fs::read(&path) else {
            continue;
        };
        let Some(first) = content.split(|&b| b == b'\n').next() else {
            continue;
        };
        if first.starts_with(b"#!") && String::from_utf8_lossy(first).contains(&needle) {
            warn!(script = %path.display(), "launcher still references the build directory");
            offenders.push(path);
        }
    }

    offenders.sort();
    Ok(offenders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MARKER: &str = "#!python -u";

    #[test]
    fn test_rewrites_only_first_line() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("hg");
        fs::write(&script, "#!/build/env/bin/python\nimport sys\n#!not a shebang\n").unwrap();

        let report = make_relocatable(&pattern_in(dir.path(), "hg"), MARKER).unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.rewritten, vec![script.clone()]);
        assert_eq!(
            fs::read_to_string(&script).unwrap(),
            "#!python -u\nimport sys\n#!not a shebang\n"
        );
    }

    #[test]
    fn test_file_without_shebang_is_untouched() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("helper.py");
        let original = "import os\n#!/usr/bin/python\n";
        fs::write(&script, original).unwrap();

        let report = make_relocatable(&pattern_in(dir.path(), "*.py"), MARKER).unwrap();

        assert_eq!(report.matched, 1);
        assert!(report.rewritten.is_empty());
        assert_eq!(fs::read_to_string(&script).unwrap(), original);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("tool.py");
        fs::write(&script, "#!/usr/bin/python2.7\r\nprint('x')\r\n").unwrap();
        let pattern = pattern_in(dir.path(), "*.py");

        make_relocatable(&pattern, MARKER).unwrap();
        let once = fs::read(&script).unwrap();
        let second = make_relocatable(&pattern, MARKER).unwrap();

        assert!(second.rewritten.is_empty());
        assert_eq!(fs::read(&script).unwrap(), once);
        assert_eq!(once, b"#!python -u\r\nprint('x')\r\n");
    }

    #[test]
    fn test_single_line_script_gains_newline() {
        assert_eq!(
            rewrite_first_line(b"#!/opt/python", "#!/usr/bin/env python").unwrap(),
            b"#!/usr/bin/env python\n"
        );
    }

    #[test]
    fn test_pattern_escapes_directory() {
        let dir = tempdir().unwrap();
        let odd = dir.path().join("with [brackets]");
        fs::create_dir_all(&odd).unwrap();
        fs::write(odd.join("a.py"), "#!/x/python\n").unwrap();

        let report = make_relocatable(&pattern_in(&odd, "*.py"), MARKER).unwrap();
        assert_eq!(report.rewritten.len(), 1);
    }

    #[test]
    fn test_verify_finds_build_paths() {
        let dir = tempdir().unwrap();
        let build_root = dir.path().join("build");
        fs::write(
            dir.path().join("stale.py"),
            format!("#!{}/python/bin/python\n", build_root.display()),
        )
        .unwrap();
        fs::write(dir.path().join("fixed.py"), "#!python -u\n").unwrap();

        let offenders = verify_relocatable(dir.path(), &build_root).unwrap();
        assert_eq!(offenders, vec![dir.path().join("stale.py")]);
    }
}
