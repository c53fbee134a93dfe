//! Run contexts and artifact naming.
//!
//! Every artifact path is derived from a [`RunContext`] with the rule
//! `<kind>-<testName>-<timestamp>.<ext>`, where the timestamp has one-second
//! resolution. Distinct `(testName, timestamp)` pairs always yield distinct
//! paths; [`TimestampAllocator`] keeps timestamps strictly increasing within a
//! batch so repeated test names cannot collide either.

use crate::config::Config;
use crate::discovery::TestUnit;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Timestamp format used in artifact names and tags.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Kind of artifact a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Rendered HTML report written by the summary hook.
    Report,
    /// Raw JSON metrics written by the engine.
    Results,
    /// HTML export of the engine's web dashboard.
    Dashboard,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Report => "report",
            ArtifactKind::Results => "results",
            ArtifactKind::Dashboard => "dashboard",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Report | ArtifactKind::Dashboard => "html",
            ArtifactKind::Results => "json",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "report" => Some(ArtifactKind::Report),
            "results" => Some(ArtifactKind::Results),
            "dashboard" => Some(ArtifactKind::Dashboard),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Engine overrides for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    /// Virtual user count override.
    pub vus: Option<u32>,
    /// Duration override in engine syntax (e.g. `30s`, `5m`).
    pub duration: Option<String>,
    /// Enables the engine's web dashboard on the given port.
    pub dashboard_port: Option<u16>,
}

/// Everything that determines the artifacts and tags of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub unit: TestUnit,
    pub timestamp: DateTime<Local>,
    pub target_url: String,
    pub project_name: String,
    pub environment_name: String,
    /// Additional tags from a batch entry.
    pub extra_tags: BTreeMap<String, String>,
    pub overrides: RunOverrides,
}

impl RunContext {
    /// Builds a context for `unit` using the settings from `config`.
    pub fn new(unit: TestUnit, timestamp: DateTime<Local>, config: &Config) -> Self {
        Self {
            unit,
            timestamp,
            target_url: config.base_url.clone(),
            project_name: config.project_name.clone(),
            environment_name: config.test_environment.clone(),
            extra_tags: BTreeMap::new(),
            overrides: RunOverrides::default(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.extra_tags = tags;
        self
    }

    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn test_name(&self) -> &str {
        &self.unit.name
    }

    /// Formatted timestamp used in names and tags.
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// File name for an artifact of the given kind.
    pub fn artifact_file_name(&self, kind: ArtifactKind) -> String {
        artifact_file_name(kind, self.test_name(), &self.timestamp_label())
    }

    /// Artifact paths for this run.
    pub fn artifacts(&self, reports_dir: &Path, output_dir: &Path) -> RunArtifact {
        RunArtifact {
            json_path: output_dir.join(self.artifact_file_name(ArtifactKind::Results)),
            html_path: reports_dir.join(self.artifact_file_name(ArtifactKind::Report)),
            dashboard_path: self
                .overrides
                .dashboard_port
                .map(|_| reports_dir.join(self.artifact_file_name(ArtifactKind::Dashboard))),
            test_name: self.test_name().to_string(),
            timestamp: self.timestamp_label(),
        }
    }

    /// Tags attached to every metric of this run, in a stable order.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![
            ("project".to_string(), self.project_name.clone()),
            ("environment".to_string(), self.environment_name.clone()),
            ("test_name".to_string(), self.test_name().to_string()),
            ("timestamp".to_string(), self.timestamp_label()),
        ];
        for (key, value) in &self.extra_tags {
            if let Some(existing) = tags.iter_mut().find(|(k, _)| k == key) {
                // Built-in tags identify the run and cannot be replaced.
                tracing::debug!(tag = %key, kept = %existing.1, "Ignoring batch tag override");
                continue;
            }
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

/// Paths a run is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifact {
    pub json_path: PathBuf,
    pub html_path: PathBuf,
    /// Dashboard export, only in dashboard mode.
    pub dashboard_path: Option<PathBuf>,
    pub test_name: String,
    pub timestamp: String,
}

/// Builds `<kind>-<testName>-<timestamp>.<ext>`.
pub fn artifact_file_name(kind: ArtifactKind, test_name: &str, timestamp: &str) -> String {
    format!(
        "{}-{}-{}.{}",
        kind.prefix(),
        test_name,
        timestamp,
        kind.extension()
    )
}

/// An artifact file name split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub kind: ArtifactKind,
    pub test_name: String,
    pub timestamp: String,
}

impl ArtifactName {
    /// Parses a file name produced by [`artifact_file_name`].
    pub fn parse(file_name: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| {
                Regex::new(r"^(report|results|dashboard)-(.+)-(\d{8}_\d{6})\.(html|json)$").ok()
            })
            .as_ref()?;

        let caps = pattern.captures(file_name)?;
        let kind = ArtifactKind::from_prefix(&caps[1])?;
        if kind.extension() != &caps[4] {
            return None;
        }
        Some(Self {
            kind,
            test_name: caps[2].to_string(),
            timestamp: caps[3].to_string(),
        })
    }

    /// Parses the file name component of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::parse(path.file_name()?.to_str()?)
    }

    /// The name of the same run's artifact of another kind.
    pub fn sibling(&self, kind: ArtifactKind) -> String {
        artifact_file_name(kind, &self.test_name, &self.timestamp)
    }

    /// The timestamp as local time, if it is well formed.
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        let naive = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()?;
        Local.from_local_datetime(&naive).earliest()
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Hands out per-run timestamps that strictly increase at one-second resolution.
#[derive(Debug, Default)]
pub struct TimestampAllocator {
    last: Option<DateTime<Local>>,
}

impl TimestampAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `now` truncated to whole seconds, bumped past the previous
    /// allocation when it would not be later.
    pub fn allocate(&mut self, now: DateTime<Local>) -> DateTime<Local> {
        let mut ts = truncate_to_second(now);
        if let Some(last) = self.last
            && ts <= last
        {
            ts = last + Duration::seconds(1);
        }
        self.last = Some(ts);
        ts
    }
}

fn truncate_to_second(ts: DateTime<Local>) -> DateTime<Local> {
    Local
        .timestamp_opt(ts.timestamp(), 0)
        .single()
        .unwrap_or(ts)
}
