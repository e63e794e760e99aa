//! Output archive builders.
//!
//! - `zip` - compresses the final layout into `<version>-<platform>.zip`

pub mod zip;

pub use self::zip::ZipPackager;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Compresses a directory tree into one distributable file.
pub trait Packager {
    /// Pack the contents of `source_dir` under `top_dir/` into `output`.
    fn pack(&self, source_dir: &Path, top_dir: &str, output: &Path) -> Result<PathBuf>;
}
