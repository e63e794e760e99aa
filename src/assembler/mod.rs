//! Environment assembly pipeline.
//!
//! The [`Assembler`] drives one build run through every [`Stage`] in order:
//!
//! ```text
//! CLEAN -> STAGED -> ENVIRONMENT_CREATED -> LAYOUT_COPIED -> REORGANIZED
//!       -> PACKAGES_INSTALLED -> RELOCATED -> PRUNED -> PACKAGED -> CLEANED
//! ```
//!
//! Each stage is all or nothing. The first failure aborts the run and
//! leaves the staging tree behind; the next run's CLEAN removes it.
//!
//! All external effects go through capability traits ([`Fetcher`],
//! [`EnvironmentCreator`], [`PackageInstaller`], [`ToolRunner`],
//! [`Packager`]) so the orchestration can run against fakes.

mod stage;

pub use stage::Stage;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::artifact::{Packager, ZipPackager};
use crate::config::{BuildConfig, Platform, ENV_DIR_NAME};
use crate::deps::{self, Asset, AssetResolver, Fetcher, HttpFetcher, Placement};
use crate::extract;
use crate::toolchain::{
    self, EnvironmentCreator, PackageInstaller, Pip, SystemRunner, ToolRunner, Virtualenv,
};
use crate::tree::{self, CopyFailed, CopyReport, TreeStats};
use crate::Timer;

/// What one successful run did.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    pub assets: Vec<Asset>,
    /// Files and links written by tree copies.
    pub copied: usize,
    /// Launcher scripts whose shebang was rewritten.
    pub relocated: Vec<PathBuf>,
    /// Files deleted while pruning.
    pub pruned: usize,
    /// Final layout as it was packaged.
    pub stats: TreeStats,
    pub archive: Option<PathBuf>,
}

/// Builds one relocatable environment archive.
pub struct Assembler {
    config: BuildConfig,
    fetcher: Box<dyn Fetcher>,
    creator: Box<dyn EnvironmentCreator>,
    installer: Box<dyn PackageInstaller>,
    runner: Box<dyn ToolRunner>,
    packager: Box<dyn Packager>,
}

impl Assembler {
    /// Assembler backed by the network, the host interpreter and pip.
    pub fn new(config: BuildConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new()?;
        let creator = Virtualenv::new(config.python.clone());
        let installer = Pip::for_platform(config.platform, &config.env_dir);
        Ok(Self {
            config,
            fetcher: Box::new(fetcher),
            creator: Box::new(creator),
            installer: Box::new(installer),
            runner: Box::new(SystemRunner),
            packager: Box::new(ZipPackager),
        })
    }

    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    pub fn with_creator(mut self, creator: impl EnvironmentCreator + 'static) -> Self {
        self.creator = Box::new(creator);
        self
    }

    pub fn with_installer(mut self, installer: impl PackageInstaller + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    pub fn with_runner(mut self, runner: impl ToolRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_packager(mut self, packager: impl Packager + 'static) -> Self {
        self.packager = Box::new(packager);
        self
    }

    /// Run every stage for `version` of the target package.
    pub fn run(&self, version: &str) -> Result<BuildReport> {
        if version.trim().is_empty() {
            bail!(
                "version of {} to be installed is required",
                self.config.platform.target_package()
            );
        }

        let mut report = BuildReport::default();
        let mut stage = Some(Stage::FIRST);
        while let Some(current) = stage {
            let timer = Timer::start(current.description());
            report.stages.push(current);
            self.enter(current, version, &mut report)
                .with_context(|| format!("{} failed", current))?;
            timer.finish();
            stage = current.next();
        }

        Ok(report)
    }

    fn enter(&self, stage: Stage, version: &str, report: &mut BuildReport) -> Result<()> {
        match stage {
            Stage::Clean => self.clean(),
            Stage::Staged => self.stage_assets(report),
            Stage::EnvironmentCreated => self.create_environment(report),
            Stage::LayoutCopied => self.copy_layout(report),
            Stage::Reorganized => self.reorganize(report),
            Stage::PackagesInstalled => self.install_packages(version),
            Stage::Relocated => self.relocate(report),
            Stage::Pruned => self.prune(report),
            Stage::Packaged => self.package(version, report),
            Stage::Cleaned => {
                tree::remove_dir_best_effort(&self.config.env_dir);
                tree::remove_dir_best_effort(&self.config.tmp_dir);
                Ok(())
            }
        }
    }

    fn clean(&self) -> Result<()> {
        let config = &self.config;
        tree::remove_dir_best_effort(&config.env_dir);
        tree::remove_dir_best_effort(&config.tmp_dir);
        fs::create_dir_all(&config.tmp_dir)
            .with_context(|| format!("creating {}", config.tmp_dir.display()))?;
        Ok(())
    }

    fn stage_assets(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        let resolver = AssetResolver::new(config, self.fetcher.as_ref());
        let assets = resolver.resolve_all(&config.assets)?;
        deps::write_index(&config.index_path(), &assets)?;

        let archiver = config.tmp_dir.join(&config.archiver);
        for asset in &assets {
            if let Placement::Extract(target) = &asset.placement {
                info!(asset = %asset.id, "extracting");
                extract::extract(
                    self.runner.as_ref(),
                    &archiver,
                    &asset.path,
                    &target.resolve(config),
                    None,
                )?;
            }
        }

        report.assets = assets;
        Ok(())
    }

    fn create_environment(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        self.creator
            .create(&config.tmp_dir.join(&config.bootstrap_script), &config.env_dir)?;

        for asset in &report.assets {
            if let Placement::Install(target) = &asset.placement {
                let dir = target.resolve(config);
                info!(asset = %asset.id, dir = %dir.display(), "running unattended installer");
                self.runner
                    .run(&asset.path, &toolchain::silent_install_args(&dir))?;
            }
        }
        for asset in &report.assets {
            if let Placement::Overlay(target) = &asset.placement {
                info!(asset = %asset.id, "overlaying");
                extract::extract_zip(&asset.path, &target.resolve(config), None)?;
            }
        }
        Ok(())
    }

    fn copy_layout(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        if config.template_dir.exists() {
            let copied = tree::copy_tree(&config.template_dir, &config.env_dir, true, None);
            self.check_copy(copied, "templates", report)?;
        } else {
            warn!(dir = %config.template_dir.display(), "no template overlay");
        }

        let prefix = match &config.python_prefix {
            Some(prefix) => prefix.clone(),
            None => toolchain::python_prefix(&config.python)?,
        };
        info!(prefix = %prefix.display(), "copying runtime");
        let copied = tree::copy_tree(&prefix, &config.python_dir(), true, None);
        self.check_copy(copied, "runtime", report)?;

        if config.platform == Platform::Windows {
            self.copy_system_dlls()?;
        }
        Ok(())
    }

    /// Bundle `pythonXX.dll` from the installation root's `system32`.
    fn copy_system_dlls(&self) -> Result<()> {
        let Some(root) = &self.config.system_root else {
            warn!("no installation root set; skipping system DLLs");
            return Ok(());
        };
        let python_dir = self.config.python_dir();
        let pattern = tree::pattern_in(&root.join("system32"), "python*.dll");
        for dll in glob::glob(&pattern)?.filter_map(Result::ok) {
            let Some(name) = dll.file_name() else {
                continue;
            };
            fs::copy(&dll, python_dir.join(name))
                .with_context(|| format!("copying {}", dll.display()))?;
            debug!(dll = %dll.display(), "bundled");
        }
        Ok(())
    }

    fn reorganize(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        let layout = config.platform.layout();
        let env = &config.env_dir;
        let python = config.python_dir();

        let site = glob::glob(&tree::pattern_in(env, layout.site_packages))?
            .filter_map(Result::ok)
            .find(|p| p.is_dir())
            .with_context(|| {
                format!("no {} in {}", layout.site_packages, env.display())
            })?;
        let relative = site.strip_prefix(env)?.to_path_buf();
        let target = python.join(&relative);
        tree::remove_dir_best_effort(&target);
        tree::move_dir(&site, &target)?;

        tree::remove_dir_best_effort(&env.join(layout.include));
        tree::remove_dir_best_effort(&env.join(layout.lib));

        let scripts = env.join(layout.scripts);
        let copied = tree::copy_tree(&scripts, &config.scripts_dir(), false, None);
        self.check_copy(copied, "scripts", report)?;
        fs::remove_dir_all(&scripts)
            .with_context(|| format!("removing {}", scripts.display()))?;

        // Installer launchers run next and still name the removed env/<scripts>.
        let marker = config.platform.relocation_marker();
        let scripts = config.scripts_dir();
        let patterns = std::iter::once("*.py").chain(config.prune_scripts.iter().map(String::as_str));
        for pattern in patterns {
            let fixed = tree::make_relocatable(&tree::pattern_in(&scripts, pattern), marker)?;
            report.relocated.extend(fixed.rewritten);
        }
        Ok(())
    }

    fn install_packages(&self, version: &str) -> Result<()> {
        for package in self.config.platform.packages(version) {
            info!(package = %package.requirement(), "installing");
            self.installer.install(&package)?;
        }
        Ok(())
    }

    fn relocate(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        let scripts = config.scripts_dir();
        let marker = config.platform.relocation_marker();

        for pattern in &config.relocate_patterns {
            let fixed = tree::make_relocatable(&tree::pattern_in(&scripts, pattern), marker)?;
            report.relocated.extend(fixed.rewritten);
        }

        let offenders = tree::verify_relocatable(&scripts, &config.base_dir)?;
        if !offenders.is_empty() {
            warn!(count = offenders.len(), "launchers still reference the build directory");
        }
        Ok(())
    }

    fn prune(&self, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        let scripts = config.scripts_dir();

        for pattern in &config.prune_scripts {
            report.pruned += tree::remove_files(&scripts, pattern)?.len();
        }
        report.pruned += tree::remove_files(&config.python_dir(), &config.bytecode_pattern)?.len();
        for dir in &config.prune_dirs {
            tree::remove_dir_best_effort(&config.env_dir.join(dir));
        }
        Ok(())
    }

    fn package(&self, version: &str, report: &mut BuildReport) -> Result<()> {
        let config = &self.config;
        report.stats = TreeStats::collect(&config.env_dir)?;
        info!(
            files = report.stats.files,
            dirs = report.stats.dirs,
            symlinks = report.stats.symlinks,
            mb = report.stats.bytes / 1024 / 1024,
            "final layout"
        );

        let archive = self
            .packager
            .pack(&config.env_dir, ENV_DIR_NAME, &config.archive_path(version))?;
        report.archive = Some(archive);
        Ok(())
    }

    /// Log copy failures; fatal unless the configuration allows partial copies.
    fn check_copy(&self, copied: CopyReport, what: &str, report: &mut BuildReport) -> Result<()> {
        report.copied += copied.copied;
        if copied.is_clean() {
            return Ok(());
        }
        for error in &copied.errors {
            warn!(src = %error.src.display(), dst = %error.dst.display(), "{}", error.message);
        }
        if self.config.strict_copy {
            return Err(CopyFailed {
                errors: copied.errors,
            })
            .with_context(|| format!("copying {}", what));
        }
        Ok(())
    }
}
