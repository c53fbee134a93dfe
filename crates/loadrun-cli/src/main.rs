//! # loadrun
//!
//! Runs k6 load tests with HTML reporting, batch aggregation, and artifact
//! retention, configured through the environment.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use loadrun_cli::{CleanupTarget, Exit, Session, signals};
use loadrun_core::Config;
use std::io::{IsTerminal, stdout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// loadrun - k6 load-test orchestration
///
/// Without a subcommand, runs TEST_FILE, every script in TEST_FOLDER, or every
/// script in SCRIPTS_DIR, in that order of preference.
#[derive(Parser, Debug)]
#[command(name = "loadrun", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single test script
    Run {
        /// Test script (.js)
        file: PathBuf,
    },

    /// Run SCRIPTS_DIR/<TYPE>.js, optionally overriding the load profile
    Test(TestArgs),

    /// Locate the HTML report for a raw results file
    Report {
        /// Raw results file (results-<test>-<timestamp>.json)
        results: PathBuf,
    },

    /// Run the tests listed in a JSON or YAML batch file
    Batch {
        /// Batch file (.json, .yml, .yaml)
        file: PathBuf,
    },

    /// Delete aged artifacts or show their age distribution
    Cleanup(CleanupArgs),

    /// Run a test with the k6 web dashboard enabled
    Dashboard {
        /// Test script (.js); defaults to TEST_FILE
        file: Option<PathBuf>,
    },

    /// Check a test script with `k6 inspect` without running it
    Validate {
        /// Test script (.js)
        file: PathBuf,
    },

    /// Print the loadrun version
    Version,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Script name in SCRIPTS_DIR without extension (e.g. smoke, load, stress)
    #[arg(value_name = "TYPE")]
    test_type: String,

    /// Number of virtual users
    #[arg(long)]
    vus: Option<u32>,

    /// Test duration in k6 syntax (e.g. 30s, 5m)
    #[arg(long)]
    duration: Option<String>,
}

#[derive(Args, Debug)]
struct CleanupArgs {
    /// What to clean
    #[arg(value_enum)]
    target: CleanupTarget,

    /// Maximum age in days, overriding MAX_REPORTS_AGE_DAYS / MAX_OUTPUT_AGE_DAYS
    #[arg(long, value_name = "DAYS")]
    max_age: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_exit(&e),
    };

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    colored::control::set_override(cli.color.should_use_colors());

    match run(cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(Exit::Failure.code())
        }
    }
}

/// Help and `--version` succeed; every other parse error is a usage failure.
fn usage_exit(error: &clap::Error) -> ExitCode {
    let _ = error.print();
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => ExitCode::from(Exit::Failure.code()),
    }
}

async fn run(cli: Cli) -> Result<Exit> {
    let Some(command) = cli.command else {
        return run_default().await;
    };

    match command {
        Commands::Version => {
            println!("loadrun {}", env!("CARGO_PKG_VERSION"));
            Ok(Exit::Success)
        }
        Commands::Report { results } => loadrun_cli::show_report(&load_config()?, &results),
        Commands::Cleanup(args) => loadrun_cli::cleanup(
            &load_config()?,
            args.target,
            args.max_age,
            SystemTime::now(),
        ),
        Commands::Run { file } => loadrun_cli::run_file(&session()?, &file).await,
        Commands::Test(args) => {
            loadrun_cli::run_test_type(&session()?, &args.test_type, args.vus, args.duration)
                .await
        }
        Commands::Batch { file } => loadrun_cli::run_batch_file(&session()?, &file).await,
        Commands::Dashboard { file } => {
            loadrun_cli::run_dashboard(&session()?, file.as_deref()).await
        }
        Commands::Validate { file } => loadrun_cli::validate(&session()?, &file).await,
    }
}

fn load_config() -> Result<Config> {
    Config::from_env().context("Invalid configuration")
}

/// Only commands that run tests install signal handlers.
fn session() -> Result<Session> {
    Ok(Session::new(load_config()?).with_shutdown(signals::install()))
}

/// Runs whatever the environment selects, or prints usage when nothing is found.
async fn run_default() -> Result<Exit> {
    match loadrun_cli::run_selected(&session()?).await? {
        Some(exit) => Ok(exit),
        None => {
            Cli::command()
                .print_help()
                .context("Failed to print usage")?;
            Ok(Exit::Success)
        }
    }
}
