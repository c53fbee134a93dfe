//! The external load engine.
//!
//! The engine is only reached through a command line and environment
//! variables. [`LoadEngine`] is the seam the executor talks to; [`K6Engine`]
//! spawns the real binary.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A fully resolved engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    /// Script to execute (the augmented temporary copy).
    pub script: PathBuf,
    /// Raw metrics destination.
    pub json_out: PathBuf,
    /// Target URL, bound into the child environment and the script's `__ENV`.
    pub base_url: String,
    /// Metric tags in order.
    pub tags: Vec<(String, String)>,
    pub vus: Option<u32>,
    pub duration: Option<String>,
    /// Extra environment for the child process.
    pub env: Vec<(String, String)>,
}

impl EngineInvocation {
    /// Command-line arguments for `k6 run`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["run".into()];

        let mut json_out = OsString::from("json=");
        json_out.push(self.json_out.as_os_str());
        args.push("--out".into());
        args.push(json_out);

        args.push("-e".into());
        args.push(format!("BASE_URL={}", self.base_url).into());

        for (key, value) in &self.tags {
            args.push("--tag".into());
            args.push(format!("{key}={value}").into());
        }

        if let Some(vus) = self.vus {
            args.push("--vus".into());
            args.push(vus.to_string().into());
        }
        if let Some(duration) = &self.duration {
            args.push("--duration".into());
            args.push(duration.into());
        }

        args.push(self.script.as_os_str().to_owned());
        args
    }
}

/// Runs engine invocations to completion.
///
/// Implementations must stop the child process if the returned future is
/// dropped before it resolves.
#[async_trait]
pub trait LoadEngine: Send + Sync {
    /// Runs the invocation and returns the exit code, or `None` when the
    /// process was terminated by a signal.
    async fn run(&self, invocation: &EngineInvocation) -> io::Result<Option<i32>>;

    /// Checks a script without running it. Returns the exit code.
    async fn inspect(&self, script: &Path) -> io::Result<Option<i32>>;
}

/// Spawns the k6 binary.
#[derive(Debug, Clone)]
pub struct K6Engine {
    binary: PathBuf,
}

impl K6Engine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for K6Engine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ENGINE_BINARY)
    }
}

#[async_trait]
impl LoadEngine for K6Engine {
    async fn run(&self, invocation: &EngineInvocation) -> io::Result<Option<i32>> {
        let mut command = Command::new(&self.binary);
        command
            .args(invocation.args())
            .env("BASE_URL", &invocation.base_url)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(binary = %self.binary.display(), script = %invocation.script.display(), "Spawning engine");
        let status = command.spawn()?.wait().await?;
        Ok(status.code())
    }

    async fn inspect(&self, script: &Path) -> io::Result<Option<i32>> {
        let status = Command::new(&self.binary)
            .arg("inspect")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;
        Ok(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> EngineInvocation {
        EngineInvocation {
            script: PathBuf::from("/scripts/.loadrun-smoke-abc.js"),
            json_out: PathBuf::from("/output/results-smoke-20250101_000000.json"),
            base_url: "http://target:8080".to_string(),
            tags: vec![
                ("project".to_string(), "shop".to_string()),
                ("test_name".to_string(), "smoke".to_string()),
            ],
            vus: None,
            duration: None,
            env: vec![],
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_args_layout() {
        let args = strings(invocation().args());
        assert_eq!(
            args,
            vec![
                "run",
                "--out",
                "json=/output/results-smoke-20250101_000000.json",
                "-e",
                "BASE_URL=http://target:8080",
                "--tag",
                "project=shop",
                "--tag",
                "test_name=smoke",
                "/scripts/.loadrun-smoke-abc.js",
            ]
        );
    }

    #[test]
    fn test_args_with_overrides() {
        let mut inv = invocation();
        inv.vus = Some(50);
        inv.duration = Some("2m".to_string());
        let args = strings(inv.args());

        let vus = args.iter().position(|a| a == "--vus").unwrap();
        assert_eq!(args[vus + 1], "50");
        let duration = args.iter().position(|a| a == "--duration").unwrap();
        assert_eq!(args[duration + 1], "2m");
        assert_eq!(args.last().unwrap(), "/scripts/.loadrun-smoke-abc.js");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_k6_engine_reports_exit_codes() {
        assert_eq!(K6Engine::new("true").run(&invocation()).await.unwrap(), Some(0));
        assert_eq!(K6Engine::new("false").run(&invocation()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_k6_engine_missing_binary_is_an_error() {
        let engine = K6Engine::new("/definitely/not/a/k6/binary");
        assert!(engine.run(&invocation()).await.is_err());
    }
}
