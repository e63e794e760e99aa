//! External tools the assembler drives.
//!
//! Each tool sits behind a small synchronous trait so the orchestration in
//! [`crate::assembler`] can be exercised with fakes. The real
//! implementations shell out through [`crate::process::Cmd`].

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::Platform;
use crate::process::Cmd;

/// A package pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    /// Extra installer arguments.
    pub options: Vec<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Requirement specifier, e.g. `mercurial==2.6.2`.
    pub fn requirement(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

/// Creates an isolated package environment.
pub trait EnvironmentCreator {
    fn create(&self, bootstrap_script: &Path, env_dir: &Path) -> Result<()>;
}

/// Installs packages into the environment being assembled.
pub trait PackageInstaller {
    fn install(&self, package: &Package) -> Result<()>;
}

/// Runs a staged helper tool (archiver, silent installer).
pub trait ToolRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<()>;
}

/// Runs the virtualenv bootstrapper with a host interpreter.
pub struct Virtualenv {
    python: String,
}

impl Virtualenv {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl EnvironmentCreator for Virtualenv {
    fn create(&self, bootstrap_script: &Path, env_dir: &Path) -> Result<()> {
        if !bootstrap_script.exists() {
            bail!(
                "bootstrapper not found at {}.\n\
                 Was the virtualenv asset extracted?",
                bootstrap_script.display()
            );
        }
        Cmd::new(&self.python)
            .arg_path(bootstrap_script)
            .arg_path(env_dir)
            .error_msg("creating virtual environment failed")
            .run_interactive()
    }
}

/// Installs packages with pip through the environment's runner script.
pub struct Pip {
    launcher: Vec<OsString>,
}

impl Pip {
    /// Pip driven by the runner script that the template overlay places in `env_dir`.
    pub fn for_platform(platform: Platform, env_dir: &Path) -> Self {
        let runner = env_dir.join(platform.runner_script());
        let launcher = match platform {
            Platform::Windows => vec![runner.into_os_string()],
            Platform::Mac => vec![OsString::from("sh"), runner.into_os_string()],
        };
        Self { launcher }
    }

    /// Arguments passed after the launcher.
    pub fn install_args(package: &Package) -> Vec<String> {
        let mut args = vec!["pip".to_string(), "install".to_string(), "--upgrade".to_string()];
        args.extend(package.options.iter().cloned());
        args.push(package.requirement());
        args
    }
}

impl PackageInstaller for Pip {
    fn install(&self, package: &Package) -> Result<()> {
        let (program, rest) = self
            .launcher
            .split_first()
            .context("pip launcher is empty")?;
        Cmd::new(program)
            .args(rest)
            .args(Self::install_args(package))
            .error_msg(format!("installing {} failed", package.requirement()))
            .run_interactive()
    }
}

/// Runs tools directly as subprocesses.
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<()> {
        Cmd::new(program)
            .args(args)
            .error_msg(format!("{} failed", program.display()))
            .run_interactive()
    }
}

/// Arguments for an unattended Inno Setup installation into `dir`.
pub fn silent_install_args(dir: &Path) -> Vec<OsString> {
    let mut target = OsString::from("/DIR=");
    target.push(dir.as_os_str());
    vec![
        OsString::from("/VERYSILENT"),
        OsString::from("/SP-"),
        OsString::from("/NOICONS"),
        target,
    ]
}

/// Ask `python` for its installation prefix (`sys.prefix`).
pub fn python_prefix(python: &str) -> Result<PathBuf> {
    let result = Cmd::new(python)
        .args(["-c", "import sys; print(sys.prefix)"])
        .error_msg("querying the interpreter prefix failed")
        .run()?;
    let prefix = result.stdout.trim();
    if prefix.is_empty() {
        bail!("{} reported an empty prefix", python);
    }
    Ok(PathBuf::from(prefix))
}
