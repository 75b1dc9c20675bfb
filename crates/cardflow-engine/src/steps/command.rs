//! Allow-listed external command step.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::{Step, StepMeta};
use crate::config::EngineConfig;
use crate::context::{WorkflowContext, INDETERMINATE};
use crate::encoding::TemplateProcessor;
use crate::error::StepError;
use crate::result::{StepResult, StepStatus};
use crate::services::PROCESS_RUNNER;

/// Executables a command step may run, by basename.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "gp", "gp.exe", "fdsm", "fdsm.exe", "openssl", "gpg", "java", "echo",
];

/// Reader errors that usually clear up on a second attempt.
const TRANSIENT_ERRORS: &[&str] = &[
    "SCARD_E_NOT_TRANSACTED",
    "SCARD_W_RESET_CARD",
    "SCARD_E_COMM_DATA_LOST",
    "SCARD_E_NO_SMARTCARD",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub command: Vec<String>,

    /// Timeout in seconds; the engine default applies if unset.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Treat any stderr output as failure, for tools that exit 0 on errors.
    #[serde(default)]
    pub fail_on_stderr: bool,
}

/// Runs an allow-listed program with templated arguments in the scratch
/// directory.
#[derive(Debug, Clone)]
pub struct CommandStep {
    meta: StepMeta,
    command: Vec<String>,
    timeout: Duration,
    fail_on_stderr: bool,
    max_retries: u32,
    retry_delay: Duration,
}

impl CommandStep {
    pub fn new(meta: StepMeta, command: Vec<String>) -> Self {
        Self::from_config(
            meta,
            CommandConfig {
                command,
                ..Default::default()
            },
            &EngineConfig::default(),
        )
    }

    pub fn from_config(meta: StepMeta, config: CommandConfig, engine: &EngineConfig) -> Self {
        Self {
            meta,
            command: config.command,
            timeout: Duration::from_secs(config.timeout.unwrap_or(engine.command_timeout_secs)),
            fail_on_stderr: config.fail_on_stderr,
            max_retries: engine.command_max_retries,
            retry_delay: Duration::from_millis(engine.command_retry_delay_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn fail_on_stderr(mut self, enabled: bool) -> Self {
        self.fail_on_stderr = enabled;
        self
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Basename of the program, if a command is set.
    fn program(&self) -> Option<&str> {
        self.command
            .first()
            .and_then(|p| p.rsplit(['/', '\\']).next())
    }

    fn check_allowed(&self) -> Result<(), String> {
        match self.program() {
            None | Some("") => Err("No command specified".to_string()),
            Some(program) if ALLOWED_COMMANDS.contains(&program) => Ok(()),
            Some(program) => Err(format!("Command not allowed: {}", program)),
        }
    }
}

fn is_transient(output: &str) -> bool {
    TRANSIENT_ERRORS.iter().any(|code| output.contains(code))
}

#[async_trait]
impl Step for CommandStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn step_type(&self) -> &str {
        "command"
    }

    fn required_services(&self) -> Vec<&'static str> {
        vec![PROCESS_RUNNER]
    }

    fn validate(&self, _ctx: &WorkflowContext) -> Option<String> {
        self.check_allowed().err()
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError> {
        ctx.report_progress(
            &self.meta.message_or(|name| format!("Running {}...", name)),
            INDETERMINATE,
        );

        if let Err(message) = self.check_allowed() {
            tracing::warn!(step_id = %self.meta.id, command = ?self.command.first(), "Command rejected");
            return Err(StepError::NotAllowed(message));
        }

        let runner = ctx
            .process_runner()
            .ok_or_else(|| StepError::MissingService(PROCESS_RUNNER.to_string()))?;

        let values = ctx.get_all_variables();
        let argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| TemplateProcessor::process(arg, &values))
            .collect();
        let cwd = ctx.temp_dir()?;

        let mut attempt = 0;
        loop {
            tracing::info!(
                program = %argv[0],
                args = ?&argv[1..],
                cwd = %cwd.display(),
                timeout = self.timeout.as_secs(),
                attempt,
                "Running command"
            );

            let start = Instant::now();
            let output = match runner.run(&argv, Some(&cwd), self.timeout).await {
                Ok(output) => output,
                Err(StepError::Timeout(secs)) => return Ok(StepResult::timeout(secs)),
                Err(e) => return Err(e),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            if output.exit_code != 0
                && attempt < self.max_retries
                && (is_transient(&output.stderr) || is_transient(&output.stdout))
            {
                attempt += 1;
                tracing::warn!(
                    step_id = %self.meta.id,
                    attempt,
                    max_retries = self.max_retries,
                    "Transient card reader error, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            let stderr_text = output.stderr.trim().to_string();
            let mut result = StepResult::from_process(output.exit_code, output.stdout, output.stderr)
                .with_duration(duration_ms);

            if result.is_success() && self.fail_on_stderr && !stderr_text.is_empty() {
                result.status = StepStatus::Error;
                result.error = Some(stderr_text);
            }

            tracing::debug!(
                step_id = %self.meta.id,
                exit_code = ?result.exit_code,
                duration_ms,
                "Command finished"
            );
            return Ok(result);
        }
    }
}
