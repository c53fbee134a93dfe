//! Single-run execution.
//!
//! The executor injects the summary hook, writes the augmented script to a
//! temporary file next to the original, runs the engine, and checks for the
//! expected artifacts. The temporary script is owned by a drop guard, so it
//! is removed on success, failure, and shutdown alike.

use crate::artifacts::{RunArtifact, RunContext};
use crate::engine::{EngineInvocation, LoadEngine};
use crate::injector;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors raised while executing a single run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The test script could not be read.
    #[error("failed to read test script {}: {source}", path.display())]
    ReadScript {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An artifact directory could not be created.
    #[error("failed to create artifact directory {}: {source}", path.display())]
    ArtifactDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The augmented script could not be written.
    #[error("failed to write temporary script: {0}")]
    TempScript(#[source] io::Error),

    /// The engine process could not be started or awaited.
    #[error("failed to run load engine: {0}")]
    Engine(#[source] io::Error),

    /// A shutdown signal arrived while the run was in flight.
    #[error("run interrupted by shutdown signal")]
    Interrupted,
}

/// Which expected artifacts exist after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactPresence {
    pub json: bool,
    pub html: bool,
}

/// The recorded result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub context: RunContext,
    pub artifacts: RunArtifact,
    /// Engine exit code; `None` if it never started or died from a signal.
    pub exit_code: Option<i32>,
    pub artifacts_present: ArtifactPresence,
    /// Why the engine could not complete, if it failed before reporting a code.
    pub error: Option<String>,
    pub duration: Duration,
}

impl RunOutcome {
    /// A run passed only when the engine exited with status zero.
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none()
    }

    pub fn test_name(&self) -> &str {
        self.context.test_name()
    }
}

/// Runs single test units through a [`LoadEngine`].
#[derive(Clone)]
pub struct Executor {
    engine: Arc<dyn LoadEngine>,
    reports_dir: PathBuf,
    output_dir: PathBuf,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Executor {
    pub fn new(
        engine: Arc<dyn LoadEngine>,
        reports_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            reports_dir: reports_dir.into(),
            output_dir: output_dir.into(),
            shutdown: None,
        }
    }

    /// Observes `shutdown`; once it reads `true` the in-flight run is stopped.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Executes one run.
    ///
    /// Failures of the run itself are captured in the returned outcome. The
    /// only error returned is [`ExecutionError::Interrupted`].
    pub async fn execute(&self, context: RunContext) -> Result<RunOutcome, ExecutionError> {
        let artifacts = context.artifacts(&self.reports_dir, &self.output_dir);
        let start = Instant::now();

        info!(test = %context.test_name(), timestamp = %artifacts.timestamp, "Starting run");

        let (exit_code, error) = match self.run_engine(&context, &artifacts).await {
            Ok(code) => (code, None),
            Err(ExecutionError::Interrupted) => {
                warn!(test = %context.test_name(), "Run interrupted");
                return Err(ExecutionError::Interrupted);
            }
            Err(e) => {
                warn!(test = %context.test_name(), error = %e, "Run could not complete");
                (None, Some(e.to_string()))
            }
        };

        let artifacts_present = check_artifacts(&artifacts);
        let outcome = RunOutcome {
            context,
            artifacts,
            exit_code,
            artifacts_present,
            error,
            duration: start.elapsed(),
        };

        if outcome.passed() {
            info!(test = %outcome.test_name(), "Run passed");
        } else {
            warn!(test = %outcome.test_name(), exit_code = ?outcome.exit_code, "Run failed");
        }

        Ok(outcome)
    }

    async fn run_engine(
        &self,
        context: &RunContext,
        artifacts: &RunArtifact,
    ) -> Result<Option<i32>, ExecutionError> {
        if self.shutdown_requested() {
            return Err(ExecutionError::Interrupted);
        }

        for dir in [&self.reports_dir, &self.output_dir] {
            fs::create_dir_all(dir).map_err(|source| ExecutionError::ArtifactDir {
                path: dir.clone(),
                source,
            })?;
        }

        let original =
            fs::read_to_string(&context.unit.path).map_err(|source| ExecutionError::ReadScript {
                path: context.unit.path.clone(),
                source,
            })?;

        let injection = injector::inject(&original, &artifacts.html_path);
        if !injection.was_augmented() {
            debug!(test = %context.test_name(), "Script already declares a summary hook");
        }

        let script = materialize(injection.content(), &context.unit.path, context.test_name())
            .map_err(ExecutionError::TempScript)?;
        debug!(script = %script.path().display(), "Wrote augmented script");

        let invocation = build_invocation(context, artifacts, script.path());
        let result = self.wait_for_engine(&invocation).await;

        // Dropping the guard would also delete it; closing reports failures.
        if let Err(e) = script.close() {
            warn!(error = %e, "Failed to remove temporary script");
        }

        result
    }

    async fn wait_for_engine(
        &self,
        invocation: &EngineInvocation,
    ) -> Result<Option<i32>, ExecutionError> {
        let run = self.engine.run(invocation);
        match self.shutdown.clone() {
            Some(mut shutdown) => {
                tokio::select! {
                    result = run => result.map_err(ExecutionError::Engine),
                    () = wait_for_shutdown(&mut shutdown) => Err(ExecutionError::Interrupted),
                }
            }
            None => run.await.map_err(ExecutionError::Engine),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolves once the channel reads `true`; never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Writes `content` to a hidden temporary script beside `original`.
///
/// Keeping the copy in the same directory lets relative imports resolve.
/// Falls back to the system temp directory when that directory is read-only.
fn materialize(content: &str, original: &Path, test_name: &str) -> io::Result<NamedTempFile> {
    let prefix = format!(".loadrun-{test_name}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".js");

    let dir = original
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = match builder.tempfile_in(dir) {
        Ok(file) => file,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Script directory not writable, using system temp dir");
            builder.tempfile()?
        }
    };

    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn build_invocation(
    context: &RunContext,
    artifacts: &RunArtifact,
    script: &Path,
) -> EngineInvocation {
    let mut env = Vec::new();
    if let Some(port) = context.overrides.dashboard_port {
        env.push(("K6_WEB_DASHBOARD".to_string(), "true".to_string()));
        env.push(("K6_WEB_DASHBOARD_PORT".to_string(), port.to_string()));
        if let Some(export) = &artifacts.dashboard_path {
            env.push((
                "K6_WEB_DASHBOARD_EXPORT".to_string(),
                export.to_string_lossy().to_string(),
            ));
        }
    }

    EngineInvocation {
        script: script.to_path_buf(),
        json_out: artifacts.json_path.clone(),
        base_url: context.target_url.clone(),
        tags: context.tags(),
        vus: context.overrides.vus,
        duration: context.overrides.duration.clone(),
        env,
    }
}

fn check_artifacts(artifacts: &RunArtifact) -> ArtifactPresence {
    let presence = ArtifactPresence {
        json: artifacts.json_path.is_file(),
        html: artifacts.html_path.is_file(),
    };
    if !presence.json {
        warn!(path = %artifacts.json_path.display(), "Raw results file was not produced");
    }
    if !presence.html {
        warn!(path = %artifacts.html_path.display(), "HTML report was not produced");
    }
    presence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::RunOverrides;
    use crate::config::Config;
    use crate::discovery::TestUnit;
    use crate::testing::{MockEngine, MockRun};
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            fs::create_dir_all(tmp.path().join("scripts")).unwrap();
            Self { tmp }
        }

        fn script(&self, name: &str, content: &str) -> TestUnit {
            let path = self.tmp.path().join("scripts").join(format!("{name}.js"));
            fs::write(&path, content).unwrap();
            TestUnit::from_path(path)
        }

        fn executor(&self, engine: &MockEngine) -> Executor {
            Executor::new(
                Arc::new(engine.clone()),
                self.tmp.path().join("reports"),
                self.tmp.path().join("output"),
            )
        }

        fn context(&self, unit: TestUnit) -> RunContext {
            let ts = Local.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).single().unwrap();
            RunContext::new(unit, ts, &Config::default())
        }

        fn leftover_scripts(&self) -> Vec<String> {
            fs::read_dir(self.tmp.path().join("scripts"))
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.starts_with(".loadrun-"))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_passing_run_records_artifacts() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass()]);
        let unit = fx.script("smoke", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(outcome.passed());
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(
            outcome.artifacts_present,
            ArtifactPresence {
                json: true,
                html: true
            }
        );
        assert!(outcome
            .artifacts
            .json_path
            .ends_with("output/results-smoke-20250601_100000.json"));
        assert!(fx.leftover_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_engine_sees_injected_script_and_tags() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass()]);
        let unit = fx.script("api", "export default function () {}\n");

        fx.executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        let runs = engine.executions();
        assert_eq!(runs.len(), 1);
        let record = &runs[0];
        assert_eq!(record.script_content.matches("handleSummary").count(), 1);
        assert!(record.script_content.contains("export default function () {}"));
        assert!(
            record
                .invocation
                .script
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".loadrun-api-")
        );
        assert_eq!(record.invocation.base_url, "http://localhost:8080");
        assert!(record
            .invocation
            .tags
            .contains(&("test_name".to_string(), "api".to_string())));
        assert!(!record.invocation.script.exists());
    }

    #[tokio::test]
    async fn test_failing_run_still_cleans_up() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::fail(99)]);
        let unit = fx.script("stress", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(!outcome.passed());
        assert_eq!(outcome.exit_code, Some(99));
        assert!(fx.leftover_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_html_is_a_warning_only() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass().without_html()]);
        let unit = fx.script("smoke", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(outcome.passed());
        assert!(outcome.artifacts_present.json);
        assert!(!outcome.artifacts_present.html);
    }

    #[tokio::test]
    async fn test_missing_raw_results_keep_exit_code_verdict() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass().without_json()]);
        let unit = fx.script("smoke", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(outcome.passed());
        assert!(!outcome.artifacts_present.json);
        assert!(outcome.artifacts_present.html);
    }

    #[tokio::test]
    async fn test_failing_run_with_report_stays_failed() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::fail(1)]);
        let unit = fx.script("smoke", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(outcome.artifacts_present.html);
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn test_engine_start_failure_is_recorded() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::spawn_error()]);
        let unit = fx.script("smoke", "export default function () {}\n");

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(!outcome.passed());
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.error.as_deref().unwrap().contains("load engine"));
        assert!(fx.leftover_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_script_is_recorded() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass()]);
        let unit = TestUnit::from_path(fx.tmp.path().join("scripts").join("gone.js"));

        let outcome = fx
            .executor(&engine)
            .execute(fx.context(unit))
            .await
            .unwrap();

        assert!(!outcome.passed());
        assert_eq!(engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_and_cleans_up() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::hang()]);
        let unit = fx.script("soak", "export default function () {}\n");
        let (tx, rx) = watch::channel(false);
        let executor = fx.executor(&engine).with_shutdown(rx);

        let handle = tokio::spawn(async move { executor.execute_owned(unit).await });
        engine.wait_until_started().await;
        assert_eq!(fx.leftover_scripts().len(), 1);

        tx.send(true).unwrap();
        let result = handle.await.unwrap();

        assert!(matches!(result, Err(ExecutionError::Interrupted)));
        assert!(fx.leftover_scripts().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_skips_engine() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass()]);
        let unit = fx.script("smoke", "export default function () {}\n");
        let (_tx, rx) = watch::channel(true);

        let result = fx
            .executor(&engine)
            .with_shutdown(rx)
            .execute(fx.context(unit))
            .await;

        assert!(matches!(result, Err(ExecutionError::Interrupted)));
        assert_eq!(engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_dashboard_mode_sets_engine_environment() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![MockRun::pass()]);
        let unit = fx.script("soak", "export default function () {}\n");
        let context = fx.context(unit).with_overrides(RunOverrides {
            dashboard_port: Some(5665),
            ..RunOverrides::default()
        });

        fx.executor(&engine).execute(context).await.unwrap();

        let env = &engine.executions()[0].invocation.env;
        assert!(env.contains(&("K6_WEB_DASHBOARD".to_string(), "true".to_string())));
        assert!(env.contains(&("K6_WEB_DASHBOARD_PORT".to_string(), "5665".to_string())));
        assert!(env.iter().any(|(k, v)| k == "K6_WEB_DASHBOARD_EXPORT"
            && v.ends_with("dashboard-soak-20250601_100000.html")));
    }

    impl Executor {
        async fn execute_owned(self, unit: TestUnit) -> Result<RunOutcome, ExecutionError> {
            let ts = Local.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).single().unwrap();
            self.execute(RunContext::new(unit, ts, &Config::default()))
                .await
        }
    }
}
