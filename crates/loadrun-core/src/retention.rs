//! Age-based retention of artifact directories.
//!
//! Only regular files directly inside the directory are considered. Nested
//! directories and symlinks are left alone. Every operation takes `now` as a
//! parameter so ages are reproducible in tests.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Which directory to sweep and how old a file may get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub directory: PathBuf,
    pub max_age_days: u64,
}

impl RetentionPolicy {
    pub fn new(directory: impl Into<PathBuf>, max_age_days: u64) -> Self {
        Self {
            directory: directory.into(),
            max_age_days,
        }
    }
}

/// Age of a file modified at `mtime`. Future timestamps count as zero.
pub fn age(now: SystemTime, mtime: SystemTime) -> Duration {
    now.duration_since(mtime).unwrap_or(Duration::ZERO)
}

/// True iff the file is strictly older than `max_age_days`.
pub fn is_expired(now: SystemTime, mtime: SystemTime, max_age_days: u64) -> bool {
    age(now, mtime) > Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY))
}

fn age_days(age: Duration) -> u64 {
    age.as_secs() / SECS_PER_DAY
}

/// A file the sweep deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub age_days: u64,
}

/// A file the sweep wanted to delete but could not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files examined.
    pub scanned: usize,
    pub removed: Vec<RemovedArtifact>,
    pub bytes_removed: u64,
    pub failures: Vec<RetentionFailure>,
}

/// A regular file found directly in the swept directory.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
}

/// Lists regular files directly under `dir`. A missing directory is empty.
fn candidates(dir: &Path) -> io::Result<Vec<Candidate>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Retention directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut files: Vec<Candidate> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            // DirEntry::metadata does not follow symlinks.
            let metadata = entry.metadata().ok()?;
            if !metadata.file_type().is_file() {
                return None;
            }
            Some(Candidate {
                path: entry.path(),
                size: metadata.len(),
                mtime: metadata.modified().ok()?,
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Deletes every expired file under the policy's directory.
pub fn sweep(policy: &RetentionPolicy, now: SystemTime) -> io::Result<SweepReport> {
    sweep_with(policy, now, |path| fs::remove_file(path))
}

/// [`sweep`] with a custom remover.
///
/// A remover error is recorded in the report and the sweep moves on.
pub fn sweep_with<F>(
    policy: &RetentionPolicy,
    now: SystemTime,
    mut remove: F,
) -> io::Result<SweepReport>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let files = candidates(&policy.directory)?;
    let mut report = SweepReport {
        scanned: files.len(),
        ..SweepReport::default()
    };

    for file in files {
        if !is_expired(now, file.mtime, policy.max_age_days) {
            continue;
        }

        match remove(&file.path) {
            Ok(()) => {
                debug!(path = %file.path.display(), size = file.size, "Removed expired artifact");
                report.bytes_removed += file.size;
                report.removed.push(RemovedArtifact {
                    age_days: age_days(age(now, file.mtime)),
                    path: file.path,
                    size: file.size,
                });
            }
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "Failed to remove expired artifact");
                report.failures.push(RetentionFailure {
                    path: file.path,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        dir = %policy.directory.display(),
        scanned = report.scanned,
        removed = report.removed.len(),
        bytes = report.bytes_removed,
        failures = report.failures.len(),
        "Retention sweep finished"
    );
    Ok(report)
}

/// Age groups used by [`stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgeBucket {
    UnderOneDay,
    OneToSevenDays,
    SevenToThirtyDays,
    OverThirtyDays,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 4] = [
        AgeBucket::UnderOneDay,
        AgeBucket::OneToSevenDays,
        AgeBucket::SevenToThirtyDays,
        AgeBucket::OverThirtyDays,
    ];

    pub fn for_age(age: Duration) -> Self {
        match age_days(age) {
            0 => Self::UnderOneDay,
            1..7 => Self::OneToSevenDays,
            7..30 => Self::SevenToThirtyDays,
            _ => Self::OverThirtyDays,
        }
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UnderOneDay => "< 1 day",
            Self::OneToSevenDays => "1-7 days",
            Self::SevenToThirtyDays => "7-30 days",
            Self::OverThirtyDays => "30+ days",
        };
        f.write_str(label)
    }
}

/// File count and size in one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeBucketStats {
    pub bucket: AgeBucket,
    pub files: usize,
    pub bytes: u64,
}

/// Read-only summary of a directory's artifact ages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionStats {
    pub directory: PathBuf,
    /// One entry per [`AgeBucket`], youngest first.
    pub buckets: Vec<AgeBucketStats>,
}

impl RetentionStats {
    pub fn total_files(&self) -> usize {
        self.buckets.iter().map(|b| b.files).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.buckets.iter().map(|b| b.bytes).sum()
    }

    pub fn bucket(&self, bucket: AgeBucket) -> AgeBucketStats {
        self.buckets
            .iter()
            .copied()
            .find(|b| b.bucket == bucket)
            .unwrap_or(AgeBucketStats {
                bucket,
                files: 0,
                bytes: 0,
            })
    }
}

/// Groups the files under `dir` by age without deleting anything.
pub fn stats(dir: &Path, now: SystemTime) -> io::Result<RetentionStats> {
    let mut buckets: Vec<AgeBucketStats> = AgeBucket::ALL
        .iter()
        .map(|&bucket| AgeBucketStats {
            bucket,
            files: 0,
            bytes: 0,
        })
        .collect();

    for file in candidates(dir)? {
        let bucket = AgeBucket::for_age(age(now, file.mtime));
        if let Some(entry) = buckets.iter_mut().find(|b| b.bucket == bucket) {
            entry.files += 1;
            entry.bytes += file.size;
        }
    }

    Ok(RetentionStats {
        directory: dir.to_path_buf(),
        buckets,
    })
}
