//! External process execution.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::StepError;

/// Output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external programs on behalf of command steps.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `argv` in `cwd`, killing it once `limit` elapses.
    async fn run(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<ProcessOutput, StepError>;
}

/// Process runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<ProcessOutput, StepError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StepError::Configuration("Empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StepError::Process(format!("Command not found: {}", program))
            }
            _ => StepError::Process(format!("Failed to spawn process: {}", e)),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Read both pipes concurrently so neither fills up
        let stdout_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let status = match timeout(limit, child.wait()).await {
            Ok(result) => result
                .map_err(|e| StepError::Process(format!("Failed to wait for process: {}", e)))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(StepError::Timeout(limit.as_secs()));
            }
        };

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_handle.await.unwrap_or_default(),
            stderr: stderr_handle.await.unwrap_or_default(),
        })
    }
}
