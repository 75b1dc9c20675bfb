//! Sequential workflow execution.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::order::{check, execution_order, Node};
use crate::config::EngineConfig;
use crate::context::{ProgressCallback, WorkflowContext, INDETERMINATE};
use crate::error::{ValidationError, WorkflowError};
use crate::result::StepResult;
use crate::steps::Step;
use crate::Values;

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    #[serde(flatten)]
    pub result: StepResult,
}

/// Results of a run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepRecord>,
}

impl ExecutionReport {
    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|r| r.step_id == step_id)
            .map(|r| &r.result)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step ids in the order they ran.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|r| r.step_id.as_str()).collect()
    }
}

/// Runs workflow steps one at a time in dependency order.
pub struct WorkflowEngine {
    steps: Vec<Box<dyn Step>>,
    index: HashMap<String, usize>,
    config: EngineConfig,
    progress: Option<ProgressCallback>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}

impl WorkflowEngine {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            index.entry(step.id().to_string()).or_insert(i);
        }
        Self {
            steps,
            index,
            config: EngineConfig::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn nodes(&self) -> Vec<Node<'_>> {
        self.steps
            .iter()
            .map(|s| (s.id(), s.depends_on()))
            .collect()
    }

    /// Check the workflow's shape. Empty if valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        check(&self.nodes())
    }

    /// Step ids in the order they would run.
    pub fn get_execution_order(&self) -> Result<Vec<String>, WorkflowError> {
        let order = self.order()?;
        Ok(order
            .into_iter()
            .map(|i| self.steps[i].id().to_string())
            .collect())
    }

    fn order(&self) -> Result<Vec<usize>, WorkflowError> {
        execution_order(&self.nodes())
            .map_err(|ids| WorkflowError::Validation(vec![ValidationError::CircularDependency(ids)]))
    }

    pub fn get_step(&self, step_id: &str) -> Option<&dyn Step> {
        self.index.get(step_id).map(|&i| self.steps[i].as_ref())
    }

    /// Steps in definition order.
    pub fn get_steps(&self) -> Vec<&dyn Step> {
        self.steps.iter().map(|s| s.as_ref()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A fresh context set up from the engine configuration.
    pub fn new_context(&self) -> WorkflowContext {
        let mut ctx = WorkflowContext::new();
        if let Some(root) = &self.config.temp_root {
            ctx = ctx.with_temp_root(root.clone());
        }
        if let Some(callback) = &self.progress {
            ctx.set_progress_callback(callback.clone());
        }
        if self.config.headless {
            ctx.set_headless(true);
        }
        ctx
    }

    /// Run in a fresh context, which is torn down afterwards.
    pub async fn run(&self, initial_values: Values) -> Result<ExecutionReport, WorkflowError> {
        let mut ctx = self.new_context();
        self.execute(&mut ctx, initial_values).await
    }

    /// Run every step in `ctx`.
    ///
    /// The context is cleaned up when the run ends, whatever the outcome.
    /// Variables and step results stay readable afterwards.
    pub async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        initial_values: Values,
    ) -> Result<ExecutionReport, WorkflowError> {
        let mut report = ExecutionReport::default();
        let outcome = self.run_steps(ctx, initial_values, &mut report).await;
        ctx.cleanup().await;
        outcome.map(|_| report)
    }

    fn report_progress(&self, ctx: &WorkflowContext, message: &str, percent: f64) {
        match &self.progress {
            Some(callback) => callback(message, percent),
            None => ctx.report_progress(message, percent),
        }
    }

    async fn run_steps(
        &self,
        ctx: &mut WorkflowContext,
        initial_values: Values,
        report: &mut ExecutionReport,
    ) -> Result<(), WorkflowError> {
        ctx.merge(initial_values);
        if let (Some(callback), None) = (&self.progress, ctx.progress_callback()) {
            ctx.set_progress_callback(callback.clone());
        }
        if self.config.headless && !ctx.is_headless() {
            ctx.set_headless(true);
        }

        let errors = self.validate();
        if !errors.is_empty() {
            return Err(WorkflowError::Validation(errors));
        }
        let order = self.order()?;
        let total = order.len();

        info!(step_count = total, "Starting workflow");

        for (position, i) in order.into_iter().enumerate() {
            let step = &self.steps[i];
            let step_id = step.id().to_string();

            if ctx.is_cancelled() {
                self.report_progress(
                    ctx,
                    &format!("Workflow cancelled at step {}", step_id),
                    INDETERMINATE,
                );
                warn!(step_id = %step_id, "Workflow cancelled");
                return Err(WorkflowError::Cancelled { step_id });
            }

            let percent = position as f64 / total as f64 * 100.0;
            let message = step
                .description()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Executing: {}", step.name()));
            self.report_progress(ctx, &message, percent);

            if let Some(message) = step.validate(ctx) {
                return Err(WorkflowError::StepValidation { step_id, message });
            }

            let missing: Vec<String> = step
                .required_services()
                .into_iter()
                .filter(|name| !ctx.has_service(name))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(WorkflowError::MissingServices {
                    step_id,
                    services: missing,
                });
            }

            debug!(step_id = %step_id, step_type = step.step_type(), "Executing step");
            let start = Instant::now();
            let mut result = match AssertUnwindSafe(step.execute(ctx)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => StepResult::error(e.to_string()),
                Err(panic) => StepResult::error(format!("Unexpected error: {}", panic_message(&*panic))),
            };
            if result.duration_ms.is_none() {
                result.duration_ms = Some(start.elapsed().as_millis() as u64);
            }

            if result.is_success() {
                if let Some(data) = &result.data {
                    ctx.set_step_result(&step_id, data.clone());
                }
                debug!(step_id = %step_id, duration_ms = ?result.duration_ms, "Step completed");
                report.steps.push(StepRecord {
                    step_id,
                    result,
                });
                continue;
            }

            let message = result.error_message();
            warn!(step_id = %step_id, error = %message, "Step failed");
            self.report_progress(
                ctx,
                &format!("Step '{}' failed: {}", step.name(), message),
                INDETERMINATE,
            );
            report.steps.push(StepRecord {
                step_id: step_id.clone(),
                result,
            });
            return Err(WorkflowError::StepFailed { step_id, message });
        }

        self.report_progress(ctx, "Workflow completed successfully", 100.0);
        info!(step_count = total, "Workflow completed");
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("steps", &self.steps.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
