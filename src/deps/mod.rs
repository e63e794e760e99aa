//! Asset resolution for the environment build.
//!
//! This module implements a 3-tier resolution pattern for third-party assets:
//!
//! 1. **Environment variable**: `MOZMILL_ENV_<ASSET>_PATH` points at a pre-downloaded file
//! 2. **Existing file**: the asset is already in `assets/`
//! 3. **Download**: fetch from the pinned URL (or `MOZMILL_ENV_<ASSET>_URL`)
//!
//! # Usage
//!
//! ```rust,ignore
//! use mozmill_env::deps::AssetResolver;
//!
//! let resolver = AssetResolver::new(&config, &fetcher);
//! let assets = resolver.resolve_all(&config.assets)?;
//! ```

mod fetch;
mod index;
mod manifest;

pub use fetch::{FetchError, FetchReport, Fetcher, HttpFetcher};
pub use index::{hash_file, write_index, IndexRecord};
pub use manifest::{parse_manifest, ManifestEntry};

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::{BuildConfig, Platform, VERSION_7Z, VERSION_VIRTUALENV};

const URL_VIRTUALENV: &str = "https://codeload.github.com/pypa/virtualenv/zip/";
const URL_7Z: &str = "http://downloads.sourceforge.net/project/sevenzip/7-Zip/";
const URL_CONEMU_VERSIONS_MANIFEST: &str =
    "http://conemu-maximus5.googlecode.com/svn/trunk/ConEmu/version.ini";

/// Where an asset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Url(String),
    /// INI version manifest; `[section]` names `version` and `location_arc`.
    Manifest { url: String, section: String },
    /// No public URL; the file must be placed in the assets directory.
    Provided,
}

/// Which tree a placement is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRoot {
    Tmp,
    Env,
}

/// Directory an asset is unpacked or installed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub root: StageRoot,
    pub subdir: Option<String>,
}

impl Target {
    pub fn tmp(subdir: Option<&str>) -> Self {
        Self {
            root: StageRoot::Tmp,
            subdir: subdir.map(str::to_string),
        }
    }

    pub fn env(subdir: Option<&str>) -> Self {
        Self {
            root: StageRoot::Env,
            subdir: subdir.map(str::to_string),
        }
    }

    pub fn resolve(&self, config: &BuildConfig) -> PathBuf {
        let root = match self.root {
            StageRoot::Tmp => &config.tmp_dir,
            StageRoot::Env => &config.env_dir,
        };
        match &self.subdir {
            Some(subdir) => root.join(subdir),
            None => root.clone(),
        }
    }
}

/// What the assembler does with an asset once it is local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Used as-is from the assets directory.
    Keep,
    /// Unpacked while staging.
    Extract(Target),
    /// Silent installer run after the environment is created.
    Install(Target),
    /// Zip unpacked over the environment after installers ran.
    Overlay(Target),
}

/// An external dependency before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub id: String,
    /// File name inside the assets directory.
    pub filename: String,
    pub version: Option<String>,
    pub source: AssetSource,
    pub placement: Placement,
}

impl AssetSpec {
    pub fn new(id: &str, filename: &str, source: AssetSource, placement: Placement) -> Self {
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            version: None,
            source,
            placement,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn is_fetchable(&self) -> bool {
        !matches!(self.source, AssetSource::Provided)
    }

    /// URL contacted first when downloading, if any.
    pub fn remote_url(&self) -> Option<&str> {
        match &self.source {
            AssetSource::Url(url) | AssetSource::Manifest { url, .. } => Some(url.as_str()),
            AssetSource::Provided => None,
        }
    }
}

/// User overrides for one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetOverride {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

/// A resolved asset: immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub version: Option<String>,
    pub path: PathBuf,
    pub placement: Placement,
    /// True when this run downloaded the file.
    pub fetched: bool,
    /// Hex SHA-256 computed while downloading.
    pub sha256: Option<String>,
}

/// Assets required to assemble the environment on `platform`, in staging order.
///
/// 7-Zip precedes ConEmu because ConEmu ships as a `.7z`.
pub fn catalog(platform: Platform) -> Vec<AssetSpec> {
    let virtualenv = AssetSpec::new(
        "virtualenv",
        "virtualenv.zip",
        AssetSource::Url(format!("{}{}", URL_VIRTUALENV, VERSION_VIRTUALENV)),
        Placement::Extract(Target::tmp(None)),
    )
    .with_version(VERSION_VIRTUALENV);

    match platform {
        Platform::Mac => vec![virtualenv],
        Platform::Windows => {
            let short = VERSION_7Z.replace('.', "");
            vec![
                virtualenv,
                AssetSpec::new(
                    "7z",
                    "7z.zip",
                    AssetSource::Url(format!("{}{}/7za{}.zip", URL_7Z, VERSION_7Z, short)),
                    Placement::Extract(Target::tmp(Some("7z"))),
                )
                .with_version(VERSION_7Z),
                AssetSpec::new(
                    "conemu",
                    "conemu.7z",
                    AssetSource::Manifest {
                        url: URL_CONEMU_VERSIONS_MANIFEST.to_string(),
                        section: "ConEmu_Preview".to_string(),
                    },
                    Placement::Extract(Target::env(Some("ConEmu"))),
                ),
                AssetSpec::new(
                    "msys-setup",
                    "msys_setup.exe",
                    AssetSource::Provided,
                    Placement::Install(Target::env(Some("msys"))),
                ),
                AssetSpec::new(
                    "msys-dll",
                    "msys_dll.zip",
                    AssetSource::Provided,
                    Placement::Overlay(Target::env(Some("msys/bin"))),
                ),
            ]
        }
    }
}

/// Find an asset without downloading: tier 1 (override path), then tier 2 (assets dir).
pub fn find_local(config: &BuildConfig, spec: &AssetSpec) -> Option<PathBuf> {
    // Tier 1: Environment variable
    if let Some(path) = config.asset_overrides.get(&spec.id).and_then(|o| o.path.as_ref()) {
        if path.exists() {
            return Some(path.clone());
        }
    }

    // Tier 2: Existing file in assets
    let cached = config.assets_dir.join(&spec.filename);
    if cached.exists() {
        return Some(cached);
    }

    None
}

/// Resolves [`AssetSpec`]s into local files.
pub struct AssetResolver<'a> {
    config: &'a BuildConfig,
    fetcher: &'a dyn Fetcher,
}

impl<'a> AssetResolver<'a> {
    pub fn new(config: &'a BuildConfig, fetcher: &'a dyn Fetcher) -> Self {
        Self { config, fetcher }
    }

    /// Find an asset locally using tiers 1 and 2 (no download).
    pub fn find(&self, spec: &AssetSpec) -> Option<PathBuf> {
        find_local(self.config, spec)
    }

    /// Resolve one asset, downloading if necessary.
    pub fn resolve(&self, spec: &AssetSpec) -> Result<Asset> {
        if let Some(path) = self.find(spec) {
            info!(asset = %spec.id, path = %path.display(), "using cached asset");
            return Ok(self.asset(spec, self.source_url(spec), spec.version.clone(), path, None));
        }

        // Tier 3: Download
        let dest = self.config.assets_dir.join(&spec.filename);
        fs::create_dir_all(&self.config.assets_dir).with_context(|| {
            format!(
                "creating assets directory {}",
                self.config.assets_dir.display()
            )
        })?;

        let (url, version) = match &spec.source {
            AssetSource::Provided => bail!(
                "asset '{}' has no download location.\n\
                 Place {} in {} or set {}{}_PATH",
                spec.id,
                spec.filename,
                self.config.assets_dir.display(),
                crate::config::ASSET_ENV_PREFIX,
                crate::config::env_key(&spec.id)
            ),
            AssetSource::Url(_) => (self.source_url(spec), spec.version.clone()),
            AssetSource::Manifest { url, section } => {
                let entry = self.resolve_manifest(spec, url, section)?;
                (entry.location, Some(entry.version))
            }
        };

        info!(asset = %spec.id, url = %url, "downloading");
        let fetched = self.fetch(&url, &dest)?;
        info!(
            asset = %spec.id,
            version = version.as_deref().unwrap_or("-"),
            bytes = fetched.bytes,
            "downloaded"
        );

        Ok(self.asset(spec, url, version, dest, Some(fetched)))
    }

    /// Resolve every asset, one at a time, in order.
    pub fn resolve_all(&self, specs: &[AssetSpec]) -> Result<Vec<Asset>> {
        specs.iter().map(|spec| self.resolve(spec)).collect()
    }

    fn override_for(&self, spec: &AssetSpec) -> Option<&AssetOverride> {
        self.config.asset_overrides.get(&spec.id)
    }

    fn source_url(&self, spec: &AssetSpec) -> String {
        if let Some(url) = self.override_for(spec).and_then(|o| o.url.clone()) {
            return url;
        }
        match &spec.source {
            AssetSource::Url(url) => url.clone(),
            AssetSource::Manifest { url, .. } => url.clone(),
            AssetSource::Provided => String::from("(provided)"),
        }
    }

    fn resolve_manifest(&self, spec: &AssetSpec, url: &str, section: &str) -> Result<ManifestEntry> {
        if let Some(location) = self.override_for(spec).and_then(|o| o.url.clone()) {
            return Ok(ManifestEntry {
                version: String::from("override"),
                location,
            });
        }

        fs::create_dir_all(&self.config.tmp_dir)?;
        let manifest_path = self.config.tmp_dir.join(format!("{}_versions.ini", spec.id));
        self.fetch(url, &manifest_path)?;

        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let _ = fs::remove_file(&manifest_path);

        parse_manifest(&content, section)
            .with_context(|| format!("resolving latest '{}' from {}", section, url))
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<FetchReport> {
        self.fetcher.fetch(url, dest).map_err(|e| {
            error!(url = %url, "failure downloading: {}", e);
            anyhow::Error::new(e)
        })
    }

    fn asset(
        &self,
        spec: &AssetSpec,
        url: String,
        version: Option<String>,
        path: PathBuf,
        fetched: Option<FetchReport>,
    ) -> Asset {
        Asset {
            id: spec.id.clone(),
            filename: spec.filename.clone(),
            url,
            version,
            path,
            placement: spec.placement.clone(),
            fetched: fetched.is_some(),
            sha256: fetched.map(|report| report.sha256),
        }
    }
}
