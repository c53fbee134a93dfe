//! Command handlers for the `loadrun` binary.
//!
//! Each handler returns an [`Exit`] describing how the process should end.
//! Errors are reserved for problems that stop a command before any run starts.

pub mod display;
pub mod signals;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use loadrun_core::retention::{self, RetentionPolicy};
use loadrun_core::{
    ArtifactKind, ArtifactName, BatchConfig, BatchError, BatchResult, BatchRunner, Config,
    Discovered, DiscoveryError, Executor, K6Engine, LoadEngine, PlannedRun, RunOverrides,
    Selection, TEST_SCRIPT_EXTENSION, discover, has_hook, resolve_file,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::warn;

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure,
    Interrupted,
}

impl Exit {
    pub fn code(self) -> u8 {
        match self {
            Exit::Success => 0,
            Exit::Failure => 1,
            Exit::Interrupted => 130,
        }
    }
}

impl From<&BatchResult> for Exit {
    fn from(result: &BatchResult) -> Self {
        if result.all_passed() {
            Exit::Success
        } else {
            Exit::Failure
        }
    }
}

/// Which artifact directories `cleanup` acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CleanupTarget {
    /// HTML reports under REPORTS_DIR
    Reports,
    /// Raw JSON results under OUTPUT_DIR
    Output,
    /// Reports, then raw results
    All,
    /// Show artifact ages without deleting anything
    Stats,
}

/// Everything a run-executing command needs.
pub struct Session {
    config: Config,
    engine: Arc<dyn LoadEngine>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Session {
    /// Creates a session that spawns the configured k6 binary.
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(K6Engine::new(config.engine_binary.clone()));
        Self {
            config,
            engine,
            shutdown: None,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn LoadEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn executor(&self, config: &Config) -> Executor {
        let executor = Executor::new(
            self.engine.clone(),
            config.reports_dir.clone(),
            config.output_dir.clone(),
        );
        match &self.shutdown {
            Some(shutdown) => executor.with_shutdown(shutdown.clone()),
            None => executor,
        }
    }

    /// Runs `runs` in order and prints progress and the final summary.
    async fn execute(&self, config: &Config, runs: Vec<PlannedRun>) -> Result<Exit> {
        let runner = BatchRunner::new(self.executor(config), config.clone())
            .on_progress(display::progress_printer());

        match runner.run(runs).await {
            Ok(result) => {
                display::print_summary(&result, config);
                Ok(Exit::from(&result))
            }
            Err(BatchError::Interrupted { partial, planned }) => {
                display::print_interrupted(&partial, planned, config);
                Ok(Exit::Interrupted)
            }
        }
    }
}

/// Runs whatever `TEST_FILE`, `TEST_FOLDER`, or the scripts directory select.
///
/// Returns `None` when the default scan found no scripts, so the caller can
/// show usage instead.
pub async fn run_selected(session: &Session) -> Result<Option<Exit>> {
    let selection = Selection::from_config(&session.config);
    match discover(&selection).context("Failed to discover test scripts")? {
        Discovered::NothingToDo { scanned } => {
            display::print_nothing_to_do(&scanned);
            Ok(None)
        }
        Discovered::Units(units) => {
            let runs = units.into_iter().map(PlannedRun::from).collect();
            session.execute(&session.config, runs).await.map(Some)
        }
    }
}

/// Runs a single script.
pub async fn run_file(session: &Session, file: &Path) -> Result<Exit> {
    let unit = resolve_file(file).context("Cannot run test")?;
    session
        .execute(&session.config, vec![PlannedRun::from(unit)])
        .await
}

/// Runs `<scripts_dir>/<test_type>.js` with optional load overrides.
pub async fn run_test_type(
    session: &Session,
    test_type: &str,
    vus: Option<u32>,
    duration: Option<String>,
) -> Result<Exit> {
    if test_type.is_empty() || test_type.contains(['/', '\\']) || test_type.starts_with('.') {
        bail!("invalid test type '{test_type}'");
    }

    let file = session
        .config
        .scripts_dir
        .join(format!("{test_type}.{TEST_SCRIPT_EXTENSION}"));
    let unit = match resolve_file(&file) {
        Ok(unit) => unit,
        Err(DiscoveryError::NotFound(_)) => {
            let available = available_test_types(&session.config.scripts_dir);
            if available.is_empty() {
                bail!(
                    "unknown test type '{test_type}': no scripts in {}",
                    session.config.scripts_dir.display()
                );
            }
            bail!(
                "unknown test type '{test_type}' (available: {})",
                available.join(", ")
            );
        }
        Err(e) => return Err(e).context("Cannot run test"),
    };

    let overrides = RunOverrides {
        vus,
        duration,
        dashboard_port: None,
    };
    session
        .execute(
            &session.config,
            vec![PlannedRun::from(unit).with_overrides(overrides)],
        )
        .await
}

fn available_test_types(scripts_dir: &Path) -> Vec<String> {
    match discover(&Selection::DefaultScan(scripts_dir.to_path_buf())) {
        Ok(Discovered::Units(units)) => units.into_iter().map(|u| u.name).collect(),
        _ => Vec::new(),
    }
}

/// Runs every entry of a JSON or YAML batch file.
pub async fn run_batch_file(session: &Session, file: &Path) -> Result<Exit> {
    let plan = BatchConfig::from_file(file)
        .and_then(|batch| batch.plan(file, &session.config))
        .with_context(|| format!("Invalid batch file {}", file.display()))?;
    session.execute(&plan.config, plan.runs).await
}

/// Runs a script with the engine's web dashboard enabled.
///
/// Falls back to `TEST_FILE` when no file is given.
pub async fn run_dashboard(session: &Session, file: Option<&Path>) -> Result<Exit> {
    let Some(file) = file.or(session.config.test_file.as_deref()) else {
        bail!("dashboard needs a test file (pass one or set TEST_FILE)");
    };
    let unit = resolve_file(file).context("Cannot run test")?;

    display::print_dashboard_url(session.config.dashboard_port);
    let overrides = RunOverrides {
        dashboard_port: Some(session.config.dashboard_port),
        ..RunOverrides::default()
    };
    session
        .execute(
            &session.config,
            vec![PlannedRun::from(unit).with_overrides(overrides)],
        )
        .await
}

/// Checks a script with `k6 inspect`; the inspection's status is the result.
pub async fn validate(session: &Session, file: &Path) -> Result<Exit> {
    let unit = resolve_file(file).context("Cannot validate test")?;
    let content = fs::read_to_string(&unit.path)
        .with_context(|| format!("Failed to read {}", unit.path.display()))?;
    display::print_hook_status(&unit.path, has_hook(&content));

    let code = session
        .engine
        .inspect(&unit.path)
        .await
        .with_context(|| {
            format!(
                "Failed to run {} inspect",
                session.config.engine_binary.display()
            )
        })?;

    if code == Some(0) {
        display::print_validation_passed(&unit.path);
        Ok(Exit::Success)
    } else {
        display::print_validation_failed(&unit.path, code);
        Ok(Exit::Failure)
    }
}

/// Finds the HTML report that belongs to a raw results file.
pub fn show_report(config: &Config, results: &Path) -> Result<Exit> {
    if !results.is_file() {
        bail!("results file not found: {}", results.display());
    }
    let name = ArtifactName::from_path(results)
        .filter(|name| name.kind == ArtifactKind::Results)
        .with_context(|| {
            format!(
                "{} is not named like a results file (results-<test>-<timestamp>.json)",
                results.display()
            )
        })?;

    let html = config.reports_dir.join(name.sibling(ArtifactKind::Report));
    let found = html.is_file();
    display::print_report_lookup(&name, results, &html, found);

    if found {
        Ok(Exit::Success)
    } else {
        warn!(report = %html.display(), "HTML report not found");
        Ok(Exit::Failure)
    }
}

/// Sweeps or summarizes artifact directories.
///
/// `max_age` replaces the configured threshold for every swept directory and
/// is rejected for `stats`. A directory that cannot be scanned or a file that
/// cannot be removed makes the command fail, but every directory is visited.
pub fn cleanup(
    config: &Config,
    target: CleanupTarget,
    max_age: Option<u64>,
    now: SystemTime,
) -> Result<Exit> {
    let reports = RetentionPolicy::new(
        config.reports_dir.clone(),
        max_age.unwrap_or(config.max_reports_age_days),
    );
    let output = RetentionPolicy::new(
        config.output_dir.clone(),
        max_age.unwrap_or(config.max_output_age_days),
    );

    let mut failures = 0;
    let policies = match target {
        CleanupTarget::Reports => vec![reports],
        CleanupTarget::Output => vec![output],
        CleanupTarget::All => vec![reports, output],
        CleanupTarget::Stats => {
            if max_age.is_some() {
                bail!("--max-age applies to reports, output and all, not stats");
            }
            for dir in [&config.reports_dir, &config.output_dir] {
                match retention::stats(dir, now) {
                    Ok(stats) => display::print_stats(&stats),
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Failed to scan artifact directory");
                        display::print_scan_failure(dir, &e);
                        failures += 1;
                    }
                }
            }
            return Ok(exit_for_failures(failures));
        }
    };

    for policy in &policies {
        match retention::sweep(policy, now) {
            Ok(report) => {
                display::print_sweep(policy, &report);
                failures += report.failures.len();
            }
            Err(e) => {
                warn!(dir = %policy.directory.display(), error = %e, "Failed to scan artifact directory");
                display::print_scan_failure(&policy.directory, &e);
                failures += 1;
            }
        }
    }

    Ok(exit_for_failures(failures))
}

fn exit_for_failures(failures: usize) -> Exit {
    if failures == 0 {
        Exit::Success
    } else {
        Exit::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadrun_core::testing::{MockEngine, MockRun};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let scripts = tmp.path().join("scripts");
            fs::create_dir_all(&scripts).unwrap();
            let config = Config {
                scripts_dir: scripts,
                reports_dir: tmp.path().join("reports"),
                output_dir: tmp.path().join("output"),
                ..Config::default()
            };
            Self { tmp, config }
        }

        fn script(&self, name: &str) -> PathBuf {
            let path = self.config.scripts_dir.join(format!("{name}.js"));
            fs::write(&path, "export default function () {}\n").unwrap();
            path
        }

        fn session(&self, engine: &MockEngine) -> Session {
            Session::new(self.config.clone()).with_engine(Arc::new(engine.clone()))
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Exit::Success.code(), 0);
        assert_eq!(Exit::Failure.code(), 1);
        assert_eq!(Exit::Interrupted.code(), 130);
    }

    #[tokio::test]
    async fn test_run_file_maps_engine_status() {
        let fx = Fixture::new();
        let script = fx.script("smoke");
        let engine = MockEngine::new(vec![MockRun::pass(), MockRun::fail(99)]);
        let session = fx.session(&engine);

        assert_eq!(run_file(&session, &script).await.unwrap(), Exit::Success);
        assert_eq!(run_file(&session, &script).await.unwrap(), Exit::Failure);
        assert_eq!(engine.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_run_file_rejects_missing_script() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![]);
        let err = run_file(&fx.session(&engine), &fx.tmp.path().join("missing.test"))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("not found"));
        assert_eq!(engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_run_selected_empty_scan_is_nothing_to_do() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![]);
        assert_eq!(run_selected(&fx.session(&engine)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_selected_continues_after_failure() {
        let fx = Fixture::new();
        for name in ["a", "b", "c"] {
            fx.script(name);
        }
        let engine = MockEngine::new(vec![MockRun::fail(1), MockRun::pass(), MockRun::pass()]);

        let exit = run_selected(&fx.session(&engine)).await.unwrap();

        assert_eq!(exit, Some(Exit::Failure));
        assert_eq!(engine.execution_count(), 3);
    }

    #[tokio::test]
    async fn test_run_test_type_applies_overrides() {
        let fx = Fixture::new();
        fx.script("load");
        let engine = MockEngine::new(vec![]);

        let exit = run_test_type(&fx.session(&engine), "load", Some(25), Some("1m".to_string()))
            .await
            .unwrap();

        assert_eq!(exit, Exit::Success);
        let invocation = &engine.executions()[0].invocation;
        assert_eq!(invocation.vus, Some(25));
        assert_eq!(invocation.duration.as_deref(), Some("1m"));
    }

    #[tokio::test]
    async fn test_run_test_type_lists_available_types() {
        let fx = Fixture::new();
        fx.script("smoke");
        fx.script("stress");
        let engine = MockEngine::new(vec![]);

        let err = run_test_type(&fx.session(&engine), "soak", None, None)
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("unknown test type 'soak'"), "{err}");
        assert!(err.contains("smoke, stress"), "{err}");
    }

    #[tokio::test]
    async fn test_run_batch_file_uses_batch_settings() {
        let fx = Fixture::new();
        fx.script("checkout");
        let batch = fx.config.scripts_dir.join("batch.yaml");
        fs::write(
            &batch,
            "project: shop\ntests:\n  - name: pay\n    script: checkout.js\n    tags:\n      team: payments\n",
        )
        .unwrap();
        let engine = MockEngine::new(vec![]);

        let exit = run_batch_file(&fx.session(&engine), &batch).await.unwrap();

        assert_eq!(exit, Exit::Success);
        let tags = &engine.executions()[0].invocation.tags;
        assert!(tags.contains(&("project".to_string(), "shop".to_string())));
        assert!(tags.contains(&("test_name".to_string(), "pay".to_string())));
        assert!(tags.contains(&("team".to_string(), "payments".to_string())));
    }

    #[tokio::test]
    async fn test_run_dashboard_sets_dashboard_env() {
        let fx = Fixture::new();
        let script = fx.script("smoke");
        let engine = MockEngine::new(vec![]);

        run_dashboard(&fx.session(&engine), Some(&script)).await.unwrap();

        let env = &engine.executions()[0].invocation.env;
        assert!(env.contains(&("K6_WEB_DASHBOARD".to_string(), "true".to_string())));
        assert!(env.contains(&("K6_WEB_DASHBOARD_PORT".to_string(), "5665".to_string())));
    }

    #[tokio::test]
    async fn test_run_dashboard_requires_a_file() {
        let fx = Fixture::new();
        let engine = MockEngine::new(vec![]);
        assert!(run_dashboard(&fx.session(&engine), None).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_interrupted() {
        let fx = Fixture::new();
        let script = fx.script("smoke");
        let engine = MockEngine::new(vec![]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let exit = run_file(&fx.session(&engine).with_shutdown(rx), &script)
            .await
            .unwrap();

        assert_eq!(exit, Exit::Interrupted);
        assert_eq!(engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_runs_inspect() {
        let fx = Fixture::new();
        let script = fx.script("smoke");
        let engine = MockEngine::new(vec![]);

        let exit = validate(&fx.session(&engine), &script).await.unwrap();

        assert_eq!(exit, Exit::Success);
        assert_eq!(engine.inspections(), vec![script]);
        assert_eq!(engine.execution_count(), 0);
    }

    #[test]
    fn test_show_report_finds_companion() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.config.output_dir).unwrap();
        fs::create_dir_all(&fx.config.reports_dir).unwrap();
        let results = fx.config.output_dir.join("results-smoke-20250101_120000.json");
        fs::write(&results, "{}").unwrap();

        assert_eq!(show_report(&fx.config, &results).unwrap(), Exit::Failure);

        fs::write(
            fx.config.reports_dir.join("report-smoke-20250101_120000.html"),
            "<html></html>",
        )
        .unwrap();
        assert_eq!(show_report(&fx.config, &results).unwrap(), Exit::Success);
    }

    #[test]
    fn test_show_report_rejects_bad_input() {
        let fx = Fixture::new();
        assert!(show_report(&fx.config, &fx.tmp.path().join("nope.json")).is_err());

        let odd = fx.tmp.path().join("metrics.json");
        fs::write(&odd, "{}").unwrap();
        assert!(show_report(&fx.config, &odd).is_err());
    }

    #[test]
    fn test_cleanup_honors_max_age_override() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.config.reports_dir).unwrap();
        let report = fx.config.reports_dir.join("report-a-20250101_000000.html");
        fs::write(&report, "x").unwrap();
        let later = SystemTime::now() + Duration::from_secs(3 * 24 * 60 * 60);

        // Default threshold of 30 days keeps it.
        assert_eq!(
            cleanup(&fx.config, CleanupTarget::Reports, None, later).unwrap(),
            Exit::Success
        );
        assert!(report.exists());

        assert_eq!(
            cleanup(&fx.config, CleanupTarget::All, Some(2), later).unwrap(),
            Exit::Success
        );
        assert!(!report.exists());
    }

    #[test]
    fn test_cleanup_all_continues_past_unreadable_directory() {
        let fx = Fixture::new();
        // A regular file where a directory is expected cannot be listed.
        fs::write(&fx.config.reports_dir, "not a directory").unwrap();
        fs::create_dir_all(&fx.config.output_dir).unwrap();
        let results = fx.config.output_dir.join("results-a-20250101_000000.json");
        fs::write(&results, "{}").unwrap();
        let later = SystemTime::now() + Duration::from_secs(30 * 24 * 60 * 60);

        let exit = cleanup(&fx.config, CleanupTarget::All, None, later).unwrap();

        assert_eq!(exit, Exit::Failure);
        assert!(!results.exists());
    }

    #[test]
    fn test_cleanup_stats_rejects_max_age() {
        let fx = Fixture::new();
        let err = cleanup(&fx.config, CleanupTarget::Stats, Some(3), SystemTime::now())
            .unwrap_err()
            .to_string();
        assert!(err.contains("--max-age"), "{err}");
    }

    #[test]
    fn test_cleanup_stats_deletes_nothing() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.config.output_dir).unwrap();
        let results = fx.config.output_dir.join("results-a-20250101_000000.json");
        fs::write(&results, "{}").unwrap();
        let much_later = SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60);

        assert_eq!(
            cleanup(&fx.config, CleanupTarget::Stats, None, much_later).unwrap(),
            Exit::Success
        );
        assert!(results.exists());
    }
}
