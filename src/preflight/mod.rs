//! Preflight checks for environment build prerequisites.
//!
//! This module validates that all prerequisites are met BEFORE starting
//! the build, which wipes the previous staging tree as its first step.
//!
//! # Checks Performed
//!
//! - **Host tools**: the Python interpreter (and `sh` on macOS)
//! - **Privileges**: elevated shell on Windows
//! - **Network**: every asset host answers
//! - **Cache status**: which assets are already local
//!
//! # Usage
//!
//! ```rust,ignore
//! use mozmill_env::preflight::PreflightChecker;
//!
//! let checker = PreflightChecker::new(config);
//! let report = runtime.block_on(checker.run_all());
//!
//! if !report.is_ok() {
//!     for error in report.errors() {
//!         eprintln!("  - {}: {}", error.name, error.message);
//!     }
//! }
//! ```

mod host_tools;
mod network;
mod privilege;

pub use host_tools::check_host_tools;
pub use network::{check_network, origins};
pub use privilege::{
    check_privilege, ensure_elevated, is_elevated, NotElevated, EXIT_NOT_ELEVATED,
};

use std::path::PathBuf;

use crate::config::BuildConfig;
use crate::deps;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Human-readable message
    pub message: String,
    /// How to fix a failure
    pub suggestion: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Comprehensive preflight report.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    pub cache_status: CacheStatus,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    /// Print a summary of the preflight checks.
    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let status = if check.passed { "[OK]" } else { "[FAIL]" };
            println!("{} {}: {}", status, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        println!("=== Cache Status ===\n");
        self.cache_status.print();

        println!();
        if self.is_ok() {
            println!("All preflight checks passed ({}/{})", self.passed_count(), self.total_count());
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// One asset as seen before a build.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub id: String,
    pub filename: String,
    /// Local file, if the asset does not need downloading.
    pub path: Option<PathBuf>,
    pub fetchable: bool,
}

/// Status of cached assets and leftovers.
#[derive(Debug, Default)]
pub struct CacheStatus {
    pub assets: Vec<CachedAsset>,
    /// A previous run left a staging tree or final layout behind.
    pub has_leftovers: bool,
}

impl CacheStatus {
    pub fn collect(config: &BuildConfig) -> Self {
        let assets = config
            .assets
            .iter()
            .map(|spec| CachedAsset {
                id: spec.id.clone(),
                filename: spec.filename.clone(),
                path: deps::find_local(config, spec),
                fetchable: spec.is_fetchable(),
            })
            .collect();
        Self {
            assets,
            has_leftovers: config.tmp_dir.exists() || config.env_dir.exists(),
        }
    }

    /// Assets that can be neither found nor downloaded.
    pub fn missing_provided(&self) -> impl Iterator<Item = &CachedAsset> {
        self.assets
            .iter()
            .filter(|a| a.path.is_none() && !a.fetchable)
    }

    pub fn print(&self) {
        for asset in &self.assets {
            let status = match (&asset.path, asset.fetchable) {
                (Some(_), _) => "[cached]  ",
                (None, true) => "[download]",
                (None, false) => "[missing] ",
            };
            println!("{}  {} ({})", status, asset.id, asset.filename);
        }
        if self.has_leftovers {
            println!("[stale]     leftovers of a previous run (removed on next build)");
        }
    }
}

/// Preflight checker for environment build prerequisites.
pub struct PreflightChecker {
    config: BuildConfig,
}

impl PreflightChecker {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Run all preflight checks and return a comprehensive report.
    pub async fn run_all(&self) -> PreflightReport {
        let mut report = PreflightReport::default();
        let config = &self.config;

        report.checks.extend(check_host_tools(&config.python, config.platform));
        report.checks.push(check_privilege(config.platform));

        report.cache_status = CacheStatus::collect(config);
        for asset in report.cache_status.missing_provided() {
            report.checks.push(CheckResult::fail(
                format!("{} asset", asset.id),
                format!("{} has no download location", asset.filename),
                format!(
                    "Place it in {} or set {}{}_PATH",
                    config.assets_dir.display(),
                    crate::config::ASSET_ENV_PREFIX,
                    crate::config::env_key(&asset.id)
                ),
            ));
        }

        // Only hosts of assets that still need downloading.
        let urls: Vec<String> = config
            .assets
            .iter()
            .filter(|spec| deps::find_local(config, spec).is_none())
            .filter_map(|spec| {
                config
                    .asset_overrides
                    .get(&spec.id)
                    .and_then(|o| o.url.clone())
                    .or_else(|| spec.remote_url().map(str::to_string))
            })
            .collect();
        report.checks.extend(check_network(&urls).await);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_check_result_pass() {
        let result = CheckResult::pass("test", "passed");
        assert!(result.passed);
        assert!(result.suggestion.is_none());
    }

    #[test]
    fn test_check_result_fail() {
        let result = CheckResult::fail("test", "failed", "fix it");
        assert!(!result.passed);
        assert!(result.suggestion.is_some());
    }

    #[test]
    fn test_preflight_report_is_ok() {
        let mut report = PreflightReport::default();
        assert!(report.is_ok());

        report.checks.push(CheckResult::pass("test1", "ok"));
        assert!(report.is_ok());

        report.checks.push(CheckResult::fail("test2", "bad", "fix"));
        assert!(!report.is_ok());
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn test_cache_status() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::new(Platform::Windows, dir.path().join("windows"));
        fs::create_dir_all(&config.assets_dir).unwrap();
        fs::write(config.assets_dir.join("virtualenv.zip"), "").unwrap();

        let status = CacheStatus::collect(&config);

        assert_eq!(status.assets.len(), 5);
        assert!(status.assets[0].path.is_some());
        assert!(status.assets[1].path.is_none());
        let missing: Vec<&str> = status.missing_provided().map(|a| a.id.as_str()).collect();
        assert_eq!(missing, ["msys-setup", "msys-dll"]);
        assert!(!status.has_leftovers);
    }
}
