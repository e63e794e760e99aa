//! mozmill-env builder CLI
//!
//! Builds a relocatable Mozmill test environment and packs it into
//! `<version>-<platform>.zip` next to the platform directory.
//!
//! # Usage
//!
//! ```bash
//! # Check prerequisites (interpreter, privileges, asset hosts)
//! mozmill-env preflight
//!
//! # Download assets and write assets/index.txt
//! mozmill-env download
//!
//! # Build the Windows environment with mozmill-automation 2.0.6
//! mozmill-env build 2.0.6 --platform windows
//!
//! # Show configuration and cached assets
//! mozmill-env status
//! ```
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `MOZMILL_ENV_<ASSET>_PATH` | use a pre-downloaded asset file |
//! | `MOZMILL_ENV_<ASSET>_URL` | download an asset from another location |
//! | `WINDIR` | installation root holding `system32/python*.dll` |
//! | `RUST_LOG` | log filter (default `info`, `debug` with `-v`) |

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mozmill_env::assembler::Assembler;
use mozmill_env::config::{BuildConfig, Platform};
use mozmill_env::deps::{self, AssetResolver, HttpFetcher};
use mozmill_env::preflight::{self, NotElevated, PreflightChecker, EXIT_NOT_ELEVATED};

#[derive(Parser)]
#[command(name = "mozmill-env")]
#[command(author, version, about = "Relocatable Mozmill environment builder", long_about = None)]
#[command(override_usage = "mozmill-env build <VERSION> [OPTIONS]\n       mozmill-env <COMMAND>")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the environment and pack it into <VERSION>-<platform>.zip
    Build {
        /// Version of mozmill-automation (Windows) or mozmill (macOS) to install
        #[arg(value_name = "VERSION")]
        target_version: String,

        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Download all fetchable assets and write the asset index
    Download {
        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Check build prerequisites
    Preflight {
        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Show configuration and cached assets
    Status {
        #[command(flatten)]
        opts: BuildOpts,
    },
}

#[derive(Args, Debug, Clone)]
struct BuildOpts {
    /// Target platform (default: this machine's)
    #[arg(long, value_enum)]
    platform: Option<Platform>,

    /// Platform build directory holding templates/ (default: ./<platform>)
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Interpreter used to run virtualenv
    #[arg(long, default_value = "python")]
    python: String,

    /// Runtime copied into the environment (default: the interpreter's sys.prefix)
    #[arg(long, value_name = "DIR")]
    python_prefix: Option<PathBuf>,
}

impl BuildOpts {
    fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::host)
    }

    fn config(&self) -> Result<BuildConfig> {
        let platform = self.platform();
        let cwd = env::current_dir().context("reading current directory")?;
        let base_dir = match &self.base_dir {
            Some(dir) => cwd.join(dir),
            None => cwd.join(platform.tag()),
        };

        let mut config = BuildConfig::new(platform, base_dir)
            .with_python(self.python.clone())
            .with_system_root(env::var_os("WINDIR").map(PathBuf::from))
            .with_env_overrides(env::vars());
        if let Some(prefix) = &self.python_prefix {
            config = config.with_python_prefix(cwd.join(prefix));
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Build {
            target_version,
            opts,
        } => cmd_build(&target_version, &opts, preflight::is_elevated),
        Commands::Download { opts } => cmd_download(&opts),
        Commands::Preflight { opts } => cmd_preflight(&opts),
        Commands::Status { opts } => cmd_status(&opts),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

/// Process exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<NotElevated>().is_some() {
        EXIT_NOT_ELEVATED
    } else {
        1
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_build(version: &str, opts: &BuildOpts, elevated: impl FnOnce() -> bool) -> Result<()> {
    use std::time::Instant;

    let platform = opts.platform();
    // Before anything touches the filesystem.
    if platform.requires_elevation() {
        preflight::ensure_elevated(platform, elevated())?;
    }

    let config = opts.config()?;
    let build_start = Instant::now();
    println!("=== Building mozmill-env {} ({}) ===\n", version, platform);

    let assembler = Assembler::new(config)?;
    let report = assembler.run(version)?;

    let total = build_start.elapsed().as_secs_f64();
    if total >= 60.0 {
        println!("\n=== Build Complete ({:.1}m) ===", total / 60.0);
    } else {
        println!("\n=== Build Complete ({:.1}s) ===", total);
    }
    println!("  Files:      {}", report.stats.files);
    println!("  Relocated:  {} scripts", report.relocated.len());
    println!("  Pruned:     {} files", report.pruned);
    if let Some(archive) = &report.archive {
        println!("  Archive:    {}", archive.display());
    }
    Ok(())
}

fn cmd_download(opts: &BuildOpts) -> Result<()> {
    let config = opts.config()?;
    let fetcher = HttpFetcher::new()?;
    let resolver = AssetResolver::new(&config, &fetcher);

    let mut assets = Vec::new();
    for spec in &config.assets {
        if spec.is_fetchable() || resolver.find(spec).is_some() {
            assets.push(resolver.resolve(spec)?);
        } else {
            warn!(
                asset = %spec.id,
                "not downloadable; place {} in {}",
                spec.filename,
                config.assets_dir.display()
            );
        }
    }

    let records = deps::write_index(&config.index_path(), &assets)?;
    info!(index = %config.index_path().display(), records = records.len(), "wrote asset index");

    println!("Assets:");
    for asset in &assets {
        let how = if asset.fetched { "downloaded" } else { "cached" };
        println!("  {:<12} {:<10} {}", asset.id, how, asset.path.display());
    }
    Ok(())
}

fn cmd_preflight(opts: &BuildOpts) -> Result<()> {
    let checker = PreflightChecker::new(opts.config()?);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(checker.run_all());

    report.print_summary();
    if !report.is_ok() {
        bail!("{} preflight checks failed", report.errors().len());
    }
    Ok(())
}

fn cmd_status(opts: &BuildOpts) -> Result<()> {
    let config = opts.config()?;
    let status = preflight::CacheStatus::collect(&config);

    println!("mozmill-env Builder Status");
    println!("==========================");
    println!();
    println!("Configuration:");
    println!("  Platform:    {}", config.platform);
    println!("  Base dir:    {}", config.base_dir.display());
    println!("  Assets:      {}", config.assets_dir.display());
    println!("  Templates:   {}", config.template_dir.display());
    println!("  Python:      {}", config.python);
    match &config.python_prefix {
        Some(prefix) => println!("  Runtime:     {}", prefix.display()),
        None => println!("  Runtime:     sys.prefix of {}", config.python),
    }
    println!("  Packages:    {}", config.platform.target_package());
    println!();

    println!("Assets:");
    status.print();
    println!();

    let templates = config.template_dir.join(config.platform.runner_script());
    if templates.exists() {
        println!("Templates:     FOUND ({})", templates.display());
    } else {
        println!("Templates:     NOT FOUND ({})", templates.display());
    }
    if config.platform.requires_elevation() {
        let elevated = if preflight::is_elevated() { "yes" } else { "no" };
        println!("Elevated:      {}", elevated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_build_requires_version() {
        let err = Cli::try_parse_from(["mozmill-env", "build"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(err.to_string().contains("VERSION"));
    }

    #[test]
    fn test_build_options() {
        let cli = Cli::try_parse_from([
            "mozmill-env",
            "build",
            "2.0.6",
            "--platform",
            "mac",
            "--python-prefix",
            "/opt/python",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Build {
            target_version,
            opts,
        } = cli.command
        else {
            panic!("expected build");
        };
        assert_eq!(target_version, "2.0.6");
        assert_eq!(opts.platform(), Platform::Mac);
        assert_eq!(opts.python, "python");
        assert_eq!(opts.python_prefix, Some(PathBuf::from("/opt/python")));
    }

    #[test]
    fn test_bare_version_points_at_build() {
        let err = Cli::try_parse_from(["mozmill-env", "2.0.6"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        assert!(err.to_string().contains("mozmill-env build <VERSION>"));
    }

    #[test]
    fn test_unelevated_windows_build_touches_nothing() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("windows");
        let opts = BuildOpts {
            platform: Some(Platform::Windows),
            base_dir: Some(base.clone()),
            python: "python".into(),
            python_prefix: None,
        };

        let err = cmd_build("2.0.6", &opts, || false).unwrap_err();

        assert!(err.downcast_ref::<NotElevated>().is_some());
        assert_eq!(exit_code(&err), EXIT_NOT_ELEVATED);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!base.exists());
    }

    #[test]
    fn test_other_failures_exit_one() {
        let err = anyhow::anyhow!("STAGED failed");
        assert_eq!(exit_code(&err), 1);
        let err = anyhow::Error::new(NotElevated {
            platform: Platform::Windows,
        })
        .context("build");
        assert_eq!(exit_code(&err), EXIT_NOT_ELEVATED);
    }

    #[test]
    fn test_config_defaults_to_platform_dir() {
        let opts = BuildOpts {
            platform: Some(Platform::Windows),
            base_dir: None,
            python: "python".into(),
            python_prefix: None,
        };
        let config = opts.config().unwrap();
        assert!(config.base_dir.ends_with("windows"));
        assert!(config.base_dir.is_absolute());
    }
}
