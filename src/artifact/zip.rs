//! Zip packager for the assembled environment.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::Packager;

/// Deflate-compressed zip with every entry under one top-level folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipPackager;

impl Packager for ZipPackager {
    fn pack(&self, source_dir: &Path, top_dir: &str, output: &Path) -> Result<PathBuf> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let file =
            File::create(output).with_context(|| format!("creating {}", output.display()))?;
        let mut writer = ZipWriter::new(file);
        let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        writer
            .add_directory(format!("{}/", top_dir), base)
            .with_context(|| format!("adding {}", top_dir))?;

        let mut entries = 0usize;
        for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {}", source_dir.display()))?;
            let path = entry.path();
            let rel = path
                .strip_prefix(source_dir)
                .with_context(|| format!("stripping prefix of {}", path.display()))?;
            let name = format!("{}/{}", top_dir, rel.to_string_lossy().replace('\\', "/"));
            let options = with_mode(base, path);

            if entry.path_is_symlink() {
                let target = fs::read_link(path)
                    .with_context(|| format!("reading link {}", path.display()))?;
                writer
                    .add_symlink(name.clone(), target.to_string_lossy().replace('\\', "/"), options)
                    .with_context(|| format!("adding link {}", name))?;
            } else if entry.file_type().is_dir() {
                writer
                    .add_directory(format!("{}/", name), options)
                    .with_context(|| format!("adding directory {}", name))?;
            } else {
                writer
                    .start_file(name.clone(), options)
                    .with_context(|| format!("adding file {}", name))?;
                let mut input =
                    File::open(path).with_context(|| format!("opening {}", path.display()))?;
                io::copy(&mut input, &mut writer).with_context(|| format!("writing {}", name))?;
            }
            entries += 1;
        }

        writer
            .finish()
            .with_context(|| format!("finalizing {}", output.display()))?;

        debug!(entries, "zip entries written");
        info!(archive = %output.display(), "packaged environment");
        Ok(output.to_path_buf())
    }
}

#[cfg(unix)]
fn with_mode(options: SimpleFileOptions, path: &Path) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    match fs::symlink_metadata(path) {
        Ok(meta) => options.unix_permissions(meta.permissions().mode() & 0o7777),
        Err(_) => options,
    }
}

#[cfg(not(unix))]
fn with_mode(options: SimpleFileOptions, _path: &Path) -> SimpleFileOptions {
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_entries_live_under_top_dir() {
        let dir = tempdir().unwrap();
        let env = dir.path().join("env");
        fs::create_dir_all(env.join("python/Scripts")).unwrap();
        fs::write(env.join("run.cmd"), "@echo off").unwrap();
        fs::write(env.join("python/Scripts/hg"), "#!python -u\n").unwrap();
        let output = dir.path().join("out/2.0.6-windows.zip");

        let written = ZipPackager.pack(&env, "mozmill-env", &output).unwrap();
        assert_eq!(written, output);

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.iter().all(|n| n.starts_with("mozmill-env/")));
        assert!(names.contains(&"mozmill-env/python/Scripts/".to_string()));

        let mut hg = String::new();
        archive
            .by_name("mozmill-env/python/Scripts/hg")
            .unwrap()
            .read_to_string(&mut hg)
            .unwrap();
        assert_eq!(hg, "#!python -u\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let env = dir.path().join("env");
        fs::create_dir_all(&env).unwrap();
        fs::write(env.join("run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(env.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        let output = dir.path().join("1.5.24-mac.zip");

        ZipPackager.pack(&env, "mozmill-env", &output).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let entry = archive.by_name("mozmill-env/run.sh").unwrap();
        assert_eq!(entry.unix_mode().map(|m| m & 0o777), Some(0o755));
    }
}
