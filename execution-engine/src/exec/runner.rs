//! Script Runner Port
//!
//! The browser-automation runner is an isolated child process: it receives
//! the generated script, a browser engine choice, and an output directory,
//! and the coordinator only interprets its exit code and captured streams.

use crate::error::{ExecResult, ExecutionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Browser engine the runner should drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_arg(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// One runner invocation: script, browser, output directory, hard timeout
#[derive(Debug, Clone)]
pub struct RunnerInvocation {
    pub script_path: PathBuf,
    pub output_dir: PathBuf,
    pub browser: BrowserKind,
    pub timeout: Duration,
}

/// Captured outcome of a runner process
#[derive(Debug, Clone)]
pub struct RunnerOutput {
    /// Exit code; None when the process was killed (timeout or signal)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunnerOutput {
    /// A run passes only on a clean zero exit within the timeout
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Both captured streams joined for the evidence log
    pub fn combined_log(&self) -> String {
        let mut log = String::new();
        if !self.stdout.trim().is_empty() {
            log.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(self.stderr.trim_end());
        }
        log
    }
}

/// Capability port for invoking the browser-automation runner
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, invocation: &RunnerInvocation) -> ExecResult<RunnerOutput>;
}

/// Spawns the configured runner binary as a child process with captured
/// stdout/stderr and a hard timeout. Timeout kills the child and reports a
/// timed-out (failed) outcome rather than an error.
pub struct ProcessRunner {
    program: PathBuf,
    base_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments placed before the script path on every invocation
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(&self, invocation: &RunnerInvocation) -> ExecResult<RunnerOutput> {
        debug!(
            "spawning runner {} for {} (browser: {})",
            self.program.display(),
            invocation.script_path.display(),
            invocation.browser,
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .arg(&invocation.script_path)
            .arg("--browser")
            .arg(invocation.browser.as_arg())
            .arg("--output-dir")
            .arg(&invocation.output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            ExecutionError::Runner(format!(
                "failed to spawn {}: {}",
                self.program.display(),
                e
            ))
        })?;

        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(RunnerOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(ExecutionError::Runner(format!(
                "runner process failed: {}",
                e
            ))),
            Err(_) => {
                // dropping the awaited future kills the child (kill_on_drop)
                warn!(
                    "runner timed out after {}s, killing child process",
                    invocation.timeout.as_secs()
                );
                Ok(RunnerOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!(
                        "Run timed out after {} seconds",
                        invocation.timeout.as_secs()
                    ),
                    timed_out: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_kind_args() {
        assert_eq!(BrowserKind::default().as_arg(), "chromium");
        assert_eq!(BrowserKind::Firefox.as_arg(), "firefox");
        assert_eq!(BrowserKind::Webkit.to_string(), "webkit");
    }

    #[test]
    fn test_success_requires_zero_exit_within_timeout() {
        let mut output = RunnerOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        };
        assert!(output.success());

        output.exit_code = Some(2);
        assert!(!output.success());

        output.exit_code = Some(0);
        output.timed_out = true;
        assert!(!output.success());
    }

    #[test]
    fn test_combined_log_joins_streams() {
        let output = RunnerOutput {
            exit_code: Some(1),
            stdout: "step 1 ok\n".to_string(),
            stderr: "element not found\n".to_string(),
            timed_out: false,
        };
        assert_eq!(output.combined_log(), "step 1 ok\nelement not found");

        let empty = RunnerOutput {
            exit_code: Some(0),
            stdout: "   ".to_string(),
            stderr: String::new(),
            timed_out: false,
        };
        assert_eq!(empty.combined_log(), "");
    }
}
