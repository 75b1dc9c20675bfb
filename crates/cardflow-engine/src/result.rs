//! Step execution result types.

use serde::{Deserialize, Serialize};

/// Status of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step completed successfully.
    Success,
    /// Step failed.
    Error,
    /// Step ran out of time.
    Timeout,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepStatus::Timeout)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Error => write!(f, "error"),
            StepStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of a step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,

    /// Step-specific result data, stored in the context on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error message if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Standard output (command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Standard error (command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Exit code (command steps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    /// Create a successful result with data.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Create a successful result without data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a failed result with message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Create a timeout result.
    pub fn timeout(duration_seconds: u64) -> Self {
        Self {
            status: StepStatus::Timeout,
            error: Some(format!("Command timed out after {} seconds", duration_seconds)),
            duration_ms: Some(duration_seconds * 1000),
            ..Self::default()
        }
    }

    /// Create a result from a finished process.
    ///
    /// A non-zero exit fails with stderr as the message, or a generic message
    /// if stderr is empty.
    pub fn from_process(exit_code: i32, stdout: String, stderr: String) -> Self {
        let error = if exit_code != 0 {
            let trimmed = stderr.trim();
            Some(if trimmed.is_empty() {
                format!("Command exited with code {}", exit_code)
            } else {
                trimmed.to_string()
            })
        } else {
            None
        };

        Self {
            status: if exit_code == 0 {
                StepStatus::Success
            } else {
                StepStatus::Error
            },
            data: Some(serde_json::json!({
                "returncode": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            })),
            error,
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code: Some(exit_code),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Error message, or a generic one for failures without a message.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("step finished with status {}", self.status))
    }
}

impl Default for StepResult {
    fn default() -> Self {
        Self {
            status: StepStatus::Success,
            data: None,
            error: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
        }
    }
}
