//! Build configuration for the mozmill environment.
//!
//! Everything the assembler needs to know about paths, pinned versions and
//! platform conventions lives in one immutable [`BuildConfig`], built once
//! in `main` and handed to [`crate::assembler::Assembler`].
//!
//! # Directory layout
//!
//! ```text
//! <repo>/
//!   assets/                 downloaded and provided assets, index.txt
//!   windows/                base_dir for --platform windows
//!     templates/            overlay copied verbatim into the environment
//!     tmp/                  staging tree (extracted tools)
//!     mozmill-env/          final layout before packaging
//!   <version>-windows.zip   output archive
//! ```
//!
//! # Example
//!
//! ```rust
//! use mozmill_env::config::{BuildConfig, Platform};
//!
//! let config = BuildConfig::new(Platform::Windows, "/build/windows");
//! assert!(config.env_dir.ends_with("mozmill-env"));
//! assert!(config.archive_path("2.0.6").ends_with("2.0.6-windows.zip"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::deps::{self, AssetOverride, AssetSpec};
use crate::toolchain::Package;

/// Pinned virtualenv release used to bootstrap the environment.
pub const VERSION_VIRTUALENV: &str = "1.10.1";

/// Pinned 7-Zip command line release (Windows only).
pub const VERSION_7Z: &str = "9.20";

/// Name of the final layout directory and the archive's top-level folder.
pub const ENV_DIR_NAME: &str = "mozmill-env";

/// Prefix for per-asset environment variable overrides.
pub const ASSET_ENV_PREFIX: &str = "MOZMILL_ENV_";

/// Target platform of the environment being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
    Windows,
    Mac,
}

impl Platform {
    /// Platform of the machine running the build.
    pub fn host() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Mac
        }
    }

    /// Tag used in directory and archive names.
    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Mac => "mac",
        }
    }

    /// Line written over absolute shebangs in launcher scripts.
    ///
    /// Windows launchers also switch Python into unbuffered mode.
    pub fn relocation_marker(&self) -> &'static str {
        match self {
            Platform::Windows => "#!python -u",
            Platform::Mac => "#!/usr/bin/env python",
        }
    }

    pub fn layout(&self) -> EnvLayout {
        match self {
            Platform::Windows => EnvLayout {
                site_packages: "Lib/site-packages",
                scripts: "Scripts",
                include: "Include",
                lib: "Lib",
            },
            Platform::Mac => EnvLayout {
                site_packages: "lib/python*/site-packages",
                scripts: "bin",
                include: "include",
                lib: "lib",
            },
        }
    }

    /// Template script that activates the environment and runs a command.
    pub fn runner_script(&self) -> &'static str {
        match self {
            Platform::Windows => "run.cmd",
            Platform::Mac => "run.sh",
        }
    }

    /// Whether the build must run with administrative privileges.
    ///
    /// The MSYS installer writes into the environment with elevated rights.
    pub fn requires_elevation(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    pub fn mercurial_version(&self) -> &'static str {
        match self {
            Platform::Windows => "2.6.2",
            Platform::Mac => "2.1",
        }
    }

    /// Package whose version is given on the command line.
    pub fn target_package(&self) -> &'static str {
        match self {
            Platform::Windows => "mozmill-automation",
            Platform::Mac => "mozmill",
        }
    }

    /// Packages installed into the environment, in order.
    ///
    /// Mercurial is pre-installed in pure mode so no compiler is needed.
    pub fn packages(&self, version: &str) -> Vec<Package> {
        vec![
            Package::new("mercurial", self.mercurial_version()).with_option("--global-option=--pure"),
            Package::new(self.target_package(), version),
        ]
    }

    /// Directories (relative to the environment) removed before packaging.
    pub fn prune_dirs(&self) -> Vec<PathBuf> {
        match self {
            Platform::Windows => vec![PathBuf::from("build"), PathBuf::from("msys/home")],
            Platform::Mac => vec![PathBuf::from("build")],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Relative paths inside a freshly created package environment.
///
/// Bootstrapper versions disagree on these, so the assembler normalizes
/// them into `python/<site_packages>` and `python/<scripts>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvLayout {
    /// Glob pattern; the first match is used.
    pub site_packages: &'static str,
    pub scripts: &'static str,
    pub include: &'static str,
    pub lib: &'static str,
}

/// Immutable configuration for one build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub platform: Platform,
    /// Platform build directory holding `templates/`.
    pub base_dir: PathBuf,
    /// Shared asset cache.
    pub assets_dir: PathBuf,
    /// Final layout; packaged and then removed.
    pub env_dir: PathBuf,
    /// Staging tree for extracted tools.
    pub tmp_dir: PathBuf,
    /// Overlay copied verbatim into `env_dir`.
    pub template_dir: PathBuf,
    /// Where the output archive is written.
    pub output_dir: PathBuf,
    /// Interpreter used to run the bootstrapper.
    pub python: String,
    /// Runtime copied into `env_dir/python`.
    pub python_prefix: Option<PathBuf>,
    /// Installation root holding `system32/python*.dll` (Windows).
    pub system_root: Option<PathBuf>,
    /// Bootstrapper script, relative to `tmp_dir`.
    pub bootstrap_script: PathBuf,
    /// 7-Zip command line tool, relative to `tmp_dir`.
    pub archiver: PathBuf,
    pub assets: Vec<AssetSpec>,
    pub asset_overrides: BTreeMap<String, AssetOverride>,
    /// File name patterns rewritten by the relocation fixer.
    pub relocate_patterns: Vec<String>,
    /// Installer entry points deleted from the scripts directory.
    pub prune_scripts: Vec<String>,
    pub bytecode_pattern: String,
    pub prune_dirs: Vec<PathBuf>,
    /// Treat any per-entry copy failure as fatal.
    pub strict_copy: bool,
}

impl BuildConfig {
    /// Create the default configuration for `platform` rooted at `base_dir`.
    pub fn new(platform: Platform, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let parent = base_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.clone());
        let archiver = if cfg!(windows) { "7z/7za.exe" } else { "7z/7za" };

        Self {
            platform,
            assets_dir: parent.join("assets"),
            env_dir: base_dir.join(ENV_DIR_NAME),
            tmp_dir: base_dir.join("tmp"),
            template_dir: base_dir.join("templates"),
            output_dir: parent,
            python: "python".to_string(),
            python_prefix: None,
            system_root: None,
            bootstrap_script: PathBuf::from(format!("virtualenv-{}", VERSION_VIRTUALENV))
                .join("virtualenv.py"),
            archiver: PathBuf::from(archiver),
            assets: deps::catalog(platform),
            asset_overrides: BTreeMap::new(),
            relocate_patterns: vec!["*.py".to_string(), "hg".to_string()],
            prune_scripts: vec!["easy_install*".to_string(), "pip*".to_string()],
            bytecode_pattern: "*.pyc".to_string(),
            prune_dirs: platform.prune_dirs(),
            strict_copy: true,
            base_dir,
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_python_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.python_prefix = Some(prefix.into());
        self
    }

    pub fn with_system_root(mut self, root: Option<PathBuf>) -> Self {
        self.system_root = root;
        self
    }

    pub fn with_assets(mut self, assets: Vec<AssetSpec>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_strict_copy(mut self, strict: bool) -> Self {
        self.strict_copy = strict;
        self
    }

    /// Collect `MOZMILL_ENV_<ASSET>_PATH` / `_URL` overrides from `vars`.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ASSET_ENV_PREFIX) else {
                continue;
            };
            let (name, kind) = match rest.rsplit_once('_') {
                Some(parts) => parts,
                None => continue,
            };
            let Some(spec) = self.assets.iter().find(|a| env_key(&a.id) == name) else {
                continue;
            };
            let entry = self.asset_overrides.entry(spec.id.clone()).or_default();
            match kind {
                "PATH" => entry.path = Some(PathBuf::from(value)),
                "URL" => entry.url = Some(value),
                _ => {}
            }
        }
        self
    }

    /// Output archive for `version`: `<parent>/<version>-<platform>.zip`.
    pub fn archive_path(&self, version: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}.zip", version, self.platform.tag()))
    }

    /// Runtime subtree of the final layout.
    pub fn python_dir(&self) -> PathBuf {
        self.env_dir.join("python")
    }

    /// Canonical launcher scripts directory of the final layout.
    pub fn scripts_dir(&self) -> PathBuf {
        self.python_dir().join(self.platform.layout().scripts)
    }

    pub fn index_path(&self) -> PathBuf {
        self.assets_dir.join("index.txt")
    }
}

/// Environment-variable form of an asset id: `msys-dll` -> `MSYS_DLL`.
pub fn env_key(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = BuildConfig::new(Platform::Windows, "/repo/windows");

        assert_eq!(config.assets_dir, PathBuf::from("/repo/assets"));
        assert_eq!(config.env_dir, PathBuf::from("/repo/windows/mozmill-env"));
        assert_eq!(config.tmp_dir, PathBuf::from("/repo/windows/tmp"));
        assert_eq!(config.template_dir, PathBuf::from("/repo/windows/templates"));
        assert_eq!(
            config.archive_path("2.0.6"),
            PathBuf::from("/repo/2.0.6-windows.zip")
        );
        assert_eq!(
            config.scripts_dir(),
            PathBuf::from("/repo/windows/mozmill-env/python/Scripts")
        );
    }

    #[test]
    fn test_platform_packages() {
        let packages = Platform::Mac.packages("1.5.24");
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].requirement(), "mercurial==2.1");
        assert_eq!(packages[1].requirement(), "mozmill==1.5.24");

        let packages = Platform::Windows.packages("2.0.6");
        assert_eq!(packages[0].options, vec!["--global-option=--pure".to_string()]);
        assert_eq!(packages[1].requirement(), "mozmill-automation==2.0.6");
    }

    #[test]
    fn test_env_overrides() {
        let config = BuildConfig::new(Platform::Windows, "/repo/windows").with_env_overrides(vec![
            ("MOZMILL_ENV_MSYS_DLL_PATH".to_string(), "/cache/dll.zip".to_string()),
            ("MOZMILL_ENV_VIRTUALENV_URL".to_string(), "http://mirror/venv.zip".to_string()),
            ("MOZMILL_ENV_UNKNOWN_PATH".to_string(), "/ignored".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(config.asset_overrides.len(), 2);
        assert_eq!(
            config.asset_overrides["msys-dll"].path,
            Some(PathBuf::from("/cache/dll.zip"))
        );
        assert_eq!(
            config.asset_overrides["virtualenv"].url.as_deref(),
            Some("http://mirror/venv.zip")
        );
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("msys-setup"), "MSYS_SETUP");
        assert_eq!(env_key("7z"), "7Z");
    }

    #[test]
    fn test_only_windows_requires_elevation() {
        assert!(Platform::Windows.requires_elevation());
        assert!(!Platform::Mac.requires_elevation());
    }
}
