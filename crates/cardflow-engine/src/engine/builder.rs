//! Building engines from workflow definitions.

use serde_json::json;
use tracing::debug;

use super::executor::WorkflowEngine;
use crate::config::EngineConfig;
use crate::context::ProgressCallback;
use crate::error::WorkflowError;
use crate::registry::{StepFactory, StepRegistry};
use crate::schema::{HookDefinition, StepDefinition, WorkflowDefinition};

/// Translates definitions into a [`WorkflowEngine`] through a [`StepRegistry`].
#[derive(Clone, Default)]
pub struct WorkflowBuilder {
    registry: StepRegistry,
    config: EngineConfig,
    progress: Option<ProgressCallback>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add a step type, replacing any factory already registered for it.
    pub fn register_step_factory<F: StepFactory + 'static>(
        mut self,
        step_type: impl Into<String>,
        factory: F,
    ) -> Self {
        self.registry.register(step_type, factory);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    fn engine(&self, steps: Vec<Box<dyn crate::steps::Step>>) -> WorkflowEngine {
        let engine = WorkflowEngine::new(steps).with_config(self.config.clone());
        match &self.progress {
            Some(callback) => engine.with_progress(callback.clone()),
            None => engine,
        }
    }

    /// Build an engine with one step per definition, in definition order.
    ///
    /// The shape of the workflow is not checked here; see
    /// [`WorkflowEngine::validate`].
    pub fn build(&self, definition: &WorkflowDefinition) -> Result<WorkflowEngine, WorkflowError> {
        let steps = definition
            .steps
            .iter()
            .map(|def| self.registry.create(def, &self.config))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(step_count = steps.len(), "Built workflow");
        Ok(self.engine(steps))
    }

    /// Build a one-step engine running a lifecycle hook.
    pub fn build_hook(
        &self,
        name: &str,
        hook: &HookDefinition,
    ) -> Result<WorkflowEngine, WorkflowError> {
        let definition = match hook {
            HookDefinition::Script { script } => {
                StepDefinition::new(name, "script").with("script", json!(script))
            }
            HookDefinition::Command { command } => {
                StepDefinition::new(name, "command").with("command", json!(command))
            }
        }
        .with_description(format!("Running {} hook", name));

        let step = self.registry.create(&definition, &self.config)?;
        Ok(self.engine(vec![step]))
    }
}

impl std::fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
