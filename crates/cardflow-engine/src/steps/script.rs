//! Sandboxed script step.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Step, StepMeta};
use crate::context::{WorkflowContext, INDETERMINATE};
use crate::error::StepError;
use crate::result::StepResult;
use crate::sandbox::{ContextFacade, ScriptSandbox};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub script: String,
}

/// Runs a Rhai snippet against the workflow context.
///
/// The value the script leaves in `result` becomes the step's data.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    meta: StepMeta,
    script: String,
    sandbox: ScriptSandbox,
}

impl ScriptStep {
    pub fn new(meta: StepMeta, script: impl Into<String>) -> Self {
        Self {
            meta,
            script: script.into(),
            sandbox: ScriptSandbox::default(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: ScriptSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

#[async_trait]
impl Step for ScriptStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn step_type(&self) -> &str {
        "script"
    }

    fn validate(&self, _ctx: &WorkflowContext) -> Option<String> {
        if self.script.trim().is_empty() {
            return Some("No script specified".to_string());
        }
        self.sandbox
            .check(&self.script)
            .err()
            .map(|e| format!("Script validation failed: {}", e))
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError> {
        ctx.report_progress(
            &self.meta.message_or(|name| format!("Executing {}...", name)),
            INDETERMINATE,
        );

        let facade = ContextFacade::from_context(ctx)?;
        let sandbox = self.sandbox.clone();
        let script = self.script.clone();
        let script_facade = facade.clone();

        // Script evaluation is synchronous; keep it off the async workers.
        let outcome = tokio::task::spawn_blocking(move || sandbox.run_script(&script, script_facade))
            .await
            .map_err(|e| StepError::Script(format!("Script task failed: {}", e)))?;

        facade.apply_to(ctx);

        Ok(match outcome {
            Ok(data) => StepResult::success(data),
            Err(e) if e.is_validation() => {
                tracing::warn!(step_id = %self.meta.id, error = %e, "Script rejected");
                StepResult::error(format!("Script validation failed: {}", e))
            }
            Err(e) => StepResult::error(format!("Script execution failed: {}", e)),
        })
    }
}
