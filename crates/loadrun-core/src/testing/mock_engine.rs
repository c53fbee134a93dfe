//! Mock load engine for deterministic testing.

use crate::engine::{EngineInvocation, LoadEngine};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// How a scripted run behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Behavior {
    Exit(i32),
    SpawnError,
    Hang,
}

/// One pre-scripted engine run.
#[derive(Debug, Clone)]
pub struct MockRun {
    behavior: Behavior,
    write_json: bool,
    write_html: bool,
}

impl MockRun {
    /// Exits 0 and writes both artifacts.
    pub fn pass() -> Self {
        Self::exit(0)
    }

    /// Exits with `code` and writes both artifacts.
    pub fn fail(code: i32) -> Self {
        Self::exit(code)
    }

    fn exit(code: i32) -> Self {
        Self {
            behavior: Behavior::Exit(code),
            write_json: true,
            write_html: true,
        }
    }

    /// Fails to start, like a missing binary.
    pub fn spawn_error() -> Self {
        Self {
            behavior: Behavior::SpawnError,
            write_json: false,
            write_html: false,
        }
    }

    /// Never finishes until the run future is dropped.
    pub fn hang() -> Self {
        Self {
            behavior: Behavior::Hang,
            write_json: false,
            write_html: false,
        }
    }

    pub fn without_html(mut self) -> Self {
        self.write_html = false;
        self
    }

    pub fn without_json(mut self) -> Self {
        self.write_json = false;
        self
    }
}

/// Record of a mock execution.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub invocation: EngineInvocation,
    /// Script content as seen while the engine was running.
    pub script_content: String,
}

#[derive(Debug)]
struct MockState {
    runs: Vec<MockRun>,
    current: usize,
    executions: Vec<ExecutionRecord>,
    inspections: Vec<PathBuf>,
}

/// Engine that replays scripted runs instead of spawning a process.
///
/// Runs beyond the scripted list pass.
#[derive(Debug, Clone)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    started: Arc<Notify>,
}

impl MockEngine {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                runs,
                current: 0,
                executions: Vec::new(),
                inspections: Vec::new(),
            })),
            started: Arc::new(Notify::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of times `run` was called.
    pub fn execution_count(&self) -> usize {
        self.state().executions.len()
    }

    /// Returns all execution records.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.state().executions.clone()
    }

    /// Returns the scripts passed to `inspect`.
    pub fn inspections(&self) -> Vec<PathBuf> {
        self.state().inspections.clone()
    }

    /// Waits until a run has started.
    pub async fn wait_until_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl LoadEngine for MockEngine {
    async fn run(&self, invocation: &EngineInvocation) -> io::Result<Option<i32>> {
        let script_content = fs::read_to_string(&invocation.script).unwrap_or_default();
        let run = {
            let mut state = self.state();
            let run = state
                .runs
                .get(state.current)
                .cloned()
                .unwrap_or_else(MockRun::pass);
            state.current += 1;
            state.executions.push(ExecutionRecord {
                invocation: invocation.clone(),
                script_content: script_content.clone(),
            });
            run
        };
        self.started.notify_one();

        match run.behavior {
            Behavior::SpawnError => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "mock engine binary not found",
            )),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            Behavior::Exit(code) => {
                if run.write_json {
                    write_artifact(&invocation.json_out, "{\"type\":\"Point\"}\n")?;
                }
                if run.write_html
                    && let Some(html) = hook_report_path(&script_content)
                {
                    write_artifact(&html, "<html></html>\n")?;
                }
                Ok(Some(code))
            }
        }
    }

    async fn inspect(&self, script: &Path) -> io::Result<Option<i32>> {
        self.state().inspections.push(script.to_path_buf());
        Ok(Some(0))
    }
}

fn write_artifact(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Extracts the report path an injected hook would write to.
fn hook_report_path(script: &str) -> Option<PathBuf> {
    let line = script.lines().find(|l| l.contains(": htmlReport(data)"))?;
    let (literal, _) = line.trim().split_once(": htmlReport(data)")?;
    serde_json::from_str::<String>(literal).ok().map(PathBuf::from)
}
