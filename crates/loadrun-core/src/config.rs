//! Environment-driven configuration.
//!
//! All settings are resolved once into an immutable [`Config`] that is passed
//! explicitly to every component. Nothing else in the crate reads the process
//! environment.

use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_SCRIPTS_DIR: &str = "/scripts";
pub const DEFAULT_REPORTS_DIR: &str = "/reports";
pub const DEFAULT_OUTPUT_DIR: &str = "/output";
pub const DEFAULT_PROJECT_NAME: &str = "k6-tests";
pub const DEFAULT_TEST_ENVIRONMENT: &str = "development";
pub const DEFAULT_MAX_REPORTS_AGE_DAYS: u64 = 30;
pub const DEFAULT_MAX_OUTPUT_AGE_DAYS: u64 = 7;
pub const DEFAULT_ENGINE_BINARY: &str = "k6";
pub const DEFAULT_DASHBOARD_PORT: u16 = 5665;

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set to a value that cannot be interpreted.
    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolved orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Target passed into each run as `BASE_URL`.
    pub base_url: String,
    /// Explicit single test file (`TEST_FILE`).
    pub test_file: Option<PathBuf>,
    /// Explicit folder of test files (`TEST_FOLDER`).
    pub test_folder: Option<PathBuf>,
    /// Directory scanned when neither file nor folder is selected.
    pub scripts_dir: PathBuf,
    /// Root for rendered HTML reports.
    pub reports_dir: PathBuf,
    /// Root for raw JSON output.
    pub output_dir: PathBuf,
    pub project_name: String,
    pub test_environment: String,
    pub max_reports_age_days: u64,
    pub max_output_age_days: u64,
    /// Load engine executable.
    pub engine_binary: PathBuf,
    /// Port of the engine's web dashboard.
    pub dashboard_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            test_file: None,
            test_folder: None,
            scripts_dir: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            test_environment: DEFAULT_TEST_ENVIRONMENT.to_string(),
            max_reports_age_days: DEFAULT_MAX_REPORTS_AGE_DAYS,
            max_output_age_days: DEFAULT_MAX_OUTPUT_AGE_DAYS,
            engine_binary: PathBuf::from(DEFAULT_ENGINE_BINARY),
            dashboard_port: DEFAULT_DASHBOARD_PORT,
        }
    }
}

impl Config {
    /// Resolves configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves configuration from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset so that `TEST_FILE=` in a container
    /// definition behaves like an absent variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            base_url: get("BASE_URL").unwrap_or(defaults.base_url),
            test_file: get("TEST_FILE").map(PathBuf::from),
            test_folder: get("TEST_FOLDER").map(PathBuf::from),
            scripts_dir: get("SCRIPTS_DIR").map_or(defaults.scripts_dir, PathBuf::from),
            reports_dir: get("REPORTS_DIR").map_or(defaults.reports_dir, PathBuf::from),
            output_dir: get("OUTPUT_DIR").map_or(defaults.output_dir, PathBuf::from),
            project_name: get("PROJECT_NAME").unwrap_or(defaults.project_name),
            test_environment: get("TEST_ENVIRONMENT").unwrap_or(defaults.test_environment),
            max_reports_age_days: parse_or(
                "MAX_REPORTS_AGE_DAYS",
                get("MAX_REPORTS_AGE_DAYS"),
                defaults.max_reports_age_days,
            )?,
            max_output_age_days: parse_or(
                "MAX_OUTPUT_AGE_DAYS",
                get("MAX_OUTPUT_AGE_DAYS"),
                defaults.max_output_age_days,
            )?,
            engine_binary: get("K6_BINARY").map_or(defaults.engine_binary, PathBuf::from),
            dashboard_port: parse_or(
                "K6_WEB_DASHBOARD_PORT",
                get("K6_WEB_DASHBOARD_PORT"),
                defaults.dashboard_port,
            )?,
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value,
                reason: e.to_string(),
            }),
    }
}
