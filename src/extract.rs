//! Archive extraction for downloaded assets.
//!
//! # Formats
//!
//! ```text
//! .zip  unpacked in-process
//! .7z   unpacked with the 7-Zip command line tool, itself shipped as a zip asset
//! ```
//!
//! Both extract into `root` or, when given, `root/<subdir>`.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::toolchain::ToolRunner;

/// Archive formats the assembler can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    /// Detect the format from the file extension.
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "7z" => Some(ArchiveFormat::SevenZip),
            _ => None,
        }
    }
}

fn target_dir(root: &Path, subdir: Option<&str>) -> PathBuf {
    match subdir {
        Some(subdir) => root.join(subdir),
        None => root.to_path_buf(),
    }
}

/// Extract a zip archive. Returns the directory it was extracted into.
pub fn extract_zip(archive: &Path, root: &Path, subdir: Option<&str>) -> Result<PathBuf> {
    let dest = target_dir(root, subdir);
    let file = File::open(archive)
        .with_context(|| format!("opening archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("reading zip archive {}", archive.display()))?;

    fs::create_dir_all(&dest)
        .with_context(|| format!("creating directory {}", dest.display()))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .with_context(|| format!("reading entry {} of {}", i, archive.display()))?;

        let Some(relative) = entry.enclosed_name() else {
            bail!(
                "refusing to extract '{}' from {}: path escapes the destination",
                entry.name(),
                archive.display()
            );
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            bail!("refusing to extract {}", relative.display());
        }

        let out = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)
                .with_context(|| format!("creating directory {}", out.display()))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer =
            File::create(&out).with_context(|| format!("creating {}", out.display()))?;
        io::copy(&mut entry, &mut writer)
            .with_context(|| format!("extracting {}", relative.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    debug!(archive = %archive.display(), dest = %dest.display(), entries = zip.len(), "extracted");
    Ok(dest)
}

/// Extract a 7z archive with the 7-Zip command line tool.
pub fn extract_7z(
    runner: &dyn ToolRunner,
    archiver: &Path,
    archive: &Path,
    root: &Path,
    subdir: Option<&str>,
) -> Result<PathBuf> {
    let dest = target_dir(root, subdir);
    if !archiver.exists() {
        bail!(
            "7-Zip not found at {}.\n\
             The 7z asset must be staged before any .7z asset.",
            archiver.display()
        );
    }

    let mut out_flag = OsString::from("-o");
    out_flag.push(dest.as_os_str());
    let args = [
        OsString::from("x"),
        OsString::from("-y"),
        out_flag,
        archive.as_os_str().to_os_string(),
    ];
    runner
        .run(archiver, &args)
        .with_context(|| format!("7-Zip extraction of {} failed", archive.display()))?;

    Ok(dest)
}

/// Extract `archive` according to its detected format.
pub fn extract(
    runner: &dyn ToolRunner,
    archiver: &Path,
    archive: &Path,
    root: &Path,
    subdir: Option<&str>,
) -> Result<PathBuf> {
    match ArchiveFormat::detect(archive) {
        Some(ArchiveFormat::Zip) => extract_zip(archive, root, subdir),
        Some(ArchiveFormat::SevenZip) => extract_7z(runner, archiver, archive, root, subdir),
        None => bail!("unsupported archive format: {}", archive.display()),
    }
}
