//! # loadrun-core
//!
//! Orchestration of k6 load-test runs and the lifecycle of their artifacts.
//!
//! This crate provides:
//! - Environment configuration and test-unit discovery
//! - Summary-hook injection into test scripts
//! - Single-run execution against a pluggable load engine
//! - Sequential batch aggregation with signal-aware cancellation
//! - Age-based retention of report and output directories

pub mod aggregator;
pub mod artifacts;
pub mod batch_config;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod executor;
pub mod injector;
pub mod retention;
pub mod testing;

pub use aggregator::{
    BatchError, BatchResult, BatchRunner, PlannedRun, ProgressCallback, ProgressEvent,
};
pub use artifacts::{
    ArtifactKind, ArtifactName, Clock, RunArtifact, RunContext, RunOverrides, SystemClock,
    TIMESTAMP_FORMAT, TimestampAllocator,
};
pub use batch_config::{BatchConfig, BatchConfigError, BatchEntry, BatchPlan};
pub use config::{Config, ConfigError};
pub use discovery::{
    Discovered, DiscoveryError, Selection, TEST_SCRIPT_EXTENSION, TestUnit, discover,
    resolve_file,
};
pub use engine::{EngineInvocation, K6Engine, LoadEngine};
pub use executor::{ArtifactPresence, ExecutionError, Executor, RunOutcome};
pub use injector::{HOOK_MARKER, Injection, has_hook, inject};
pub use retention::{
    AgeBucket, AgeBucketStats, RemovedArtifact, RetentionFailure, RetentionPolicy,
    RetentionStats, SweepReport,
};
