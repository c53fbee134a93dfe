//! Test unit discovery.
//!
//! Resolves the ordered list of test scripts to run from one of three
//! selection modes: an explicit file, an explicit folder, or a scan of the
//! default scripts directory.

use crate::config::Config;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Extension recognized as a test script.
pub const TEST_SCRIPT_EXTENSION: &str = "js";

/// One test-definition file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestUnit {
    /// Path to the script.
    pub path: PathBuf,
    /// Name used in artifact names and tags.
    pub name: String,
}

impl TestUnit {
    /// Creates a unit named after the file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "test".to_string());
        Self { path, name }
    }

    /// Creates a unit with an explicit name.
    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// How test units are selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A single configured file.
    File(PathBuf),
    /// Every script directly inside a configured folder.
    Folder(PathBuf),
    /// Every script directly inside the default scripts directory.
    DefaultScan(PathBuf),
}

impl Selection {
    /// Picks the selection mode from configuration.
    ///
    /// `TEST_FILE` wins over `TEST_FOLDER`, which wins over the default scan.
    pub fn from_config(config: &Config) -> Self {
        if let Some(file) = &config.test_file {
            Selection::File(file.clone())
        } else if let Some(folder) = &config.test_folder {
            Selection::Folder(folder.clone())
        } else {
            Selection::DefaultScan(config.scripts_dir.clone())
        }
    }
}

/// Result of a successful discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    /// Units to run, in execution order. Never empty.
    Units(Vec<TestUnit>),
    /// The default scan found nothing; the caller shows usage and exits 0.
    NothingToDo { scanned: PathBuf },
}

/// Errors raised while resolving a selection.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The selected file or folder does not exist.
    #[error("test selection not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The selector exists but cannot be used.
    #[error("invalid test selection {}: {reason}", path.display())]
    InvalidSelector { path: PathBuf, reason: String },

    /// An explicit folder contained no test scripts.
    #[error("no test scripts (*.js) found in {}", .0.display())]
    EmptySelection(PathBuf),

    /// Reading the folder failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DiscoveryError {
    /// Returns true for selector problems (missing path, wrong type or extension).
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::NotFound(_) | DiscoveryError::InvalidSelector { .. }
        )
    }
}

/// Resolves a selection into test units.
pub fn discover(selection: &Selection) -> Result<Discovered, DiscoveryError> {
    match selection {
        Selection::File(path) => resolve_file(path).map(|unit| Discovered::Units(vec![unit])),
        Selection::Folder(path) => {
            if !path.exists() {
                return Err(DiscoveryError::NotFound(path.clone()));
            }
            if !path.is_dir() {
                return Err(DiscoveryError::InvalidSelector {
                    path: path.clone(),
                    reason: "not a directory".to_string(),
                });
            }
            let units = scan_folder(path)?;
            if units.is_empty() {
                return Err(DiscoveryError::EmptySelection(path.clone()));
            }
            Ok(Discovered::Units(units))
        }
        Selection::DefaultScan(path) => {
            if !path.is_dir() {
                debug!(dir = %path.display(), "Default scripts directory is missing");
                return Ok(Discovered::NothingToDo {
                    scanned: path.clone(),
                });
            }
            let units = scan_folder(path)?;
            if units.is_empty() {
                Ok(Discovered::NothingToDo {
                    scanned: path.clone(),
                })
            } else {
                Ok(Discovered::Units(units))
            }
        }
    }
}

/// Validates a single explicit test file.
pub fn resolve_file(path: &Path) -> Result<TestUnit, DiscoveryError> {
    if !path.exists() {
        return Err(DiscoveryError::NotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(DiscoveryError::InvalidSelector {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    if !has_script_extension(path) {
        return Err(DiscoveryError::InvalidSelector {
            path: path.to_path_buf(),
            reason: format!("expected a .{TEST_SCRIPT_EXTENSION} test script"),
        });
    }
    Ok(TestUnit::from_path(path))
}

/// Lists scripts directly inside `dir` in lexical path order.
///
/// Hidden files are skipped; they include temporaries left behind by an
/// interrupted run.
fn scan_folder(dir: &Path) -> Result<Vec<TestUnit>, DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && path.is_file() && has_script_extension(&path) {
                Some(path)
            } else {
                None
            }
        })
        .collect();

    paths.sort();
    paths.dedup();

    debug!(dir = %dir.display(), count = paths.len(), "Scanned for test scripts");
    Ok(paths.into_iter().map(TestUnit::from_path).collect())
}

fn has_script_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TEST_SCRIPT_EXTENSION))
}
