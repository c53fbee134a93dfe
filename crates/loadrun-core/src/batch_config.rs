//! Batch configuration files.
//!
//! A batch file lists the runs to execute in order, optionally overriding the
//! project, environment, and target of the resolved [`Config`]:
//!
//! ```json
//! {
//!   "project": "shop",
//!   "environment": "staging",
//!   "baseUrl": "https://staging.example.com",
//!   "tests": [
//!     { "name": "checkout", "script": "checkout.js", "tags": { "team": "payments" } }
//!   ]
//! }
//! ```
//!
//! JSON and YAML are accepted, chosen by file extension. Script paths are
//! resolved relative to the batch file.

use crate::aggregator::PlannedRun;
use crate::artifacts::RunOverrides;
use crate::config::Config;
use crate::discovery::{self, DiscoveryError, TestUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or resolving a batch file.
#[derive(Debug, Error)]
pub enum BatchConfigError {
    #[error("failed to read batch file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse batch file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported batch file format {} (expected .json, .yml or .yaml)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("batch file {} lists no tests", .0.display())]
    Empty(PathBuf),

    #[error("invalid batch entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("batch entry '{name}': {source}")]
    Script {
        name: String,
        #[source]
        source: DiscoveryError,
    },
}

impl BatchConfigError {
    /// Everything except an empty test list is a configuration error.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, Self::Empty(_))
    }
}

/// One run in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Test name used for artifacts and tags.
    pub name: String,
    /// Script path, relative to the batch file.
    pub script: PathBuf,
    /// Tags added to this run's metrics.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A parsed batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tests: Vec<BatchEntry>,
}

/// A batch ready to hand to the aggregator.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// The base configuration with the batch overrides applied.
    pub config: Config,
    pub runs: Vec<PlannedRun>,
}

impl BatchConfig {
    /// Loads a batch file, picking the parser from its extension.
    pub fn from_file(path: &Path) -> Result<Self, BatchConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| BatchConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let parsed = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            Some("yml" | "yaml") => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            _ => return Err(BatchConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        parsed.map_err(|message| BatchConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Validates every entry and produces the run plan.
    ///
    /// Fails before anything runs if any entry is unusable.
    pub fn plan(
        &self,
        batch_file: &Path,
        base: &Config,
    ) -> Result<BatchPlan, BatchConfigError> {
        if self.tests.is_empty() {
            return Err(BatchConfigError::Empty(batch_file.to_path_buf()));
        }

        let base_dir = batch_file.parent().unwrap_or_else(|| Path::new("."));
        let mut config = base.clone();
        if let Some(project) = &self.project {
            config.project_name = project.clone();
        }
        if let Some(environment) = &self.environment {
            config.test_environment = environment.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }

        let runs = self
            .tests
            .iter()
            .map(|entry| {
                validate_name(&entry.name)?;
                let script = base_dir.join(&entry.script);
                let unit = discovery::resolve_file(&script).map_err(|source| {
                    BatchConfigError::Script {
                        name: entry.name.clone(),
                        source,
                    }
                })?;
                Ok(PlannedRun {
                    unit: TestUnit::named(unit.path, entry.name.clone()),
                    tags: entry.tags.clone(),
                    overrides: RunOverrides::default(),
                })
            })
            .collect::<Result<Vec<_>, BatchConfigError>>()?;

        Ok(BatchPlan { config, runs })
    }
}

/// Names end up in file names, so they must be a single path component.
fn validate_name(name: &str) -> Result<(), BatchConfigError> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.contains(['/', '\\']) {
        Some("name must not contain path separators")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BatchConfigError::InvalidEntry {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
