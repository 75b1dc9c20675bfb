//! Step-type registry.
//!
//! Maps a definition's type tag to a factory that builds the executable step.
//! Third-party step types are added by registering further factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::sandbox::ScriptSandbox;
use crate::schema::StepDefinition;
use crate::steps::{
    ApduConfig, ApduStep, CommandConfig, CommandStep, ConfirmationStep, DialogConfig, DialogStep,
    ScriptConfig, ScriptStep, Step, StepMeta,
};

/// Builds a step from its definition.
pub trait StepFactory: Send + Sync {
    fn create(
        &self,
        definition: &StepDefinition,
        config: &EngineConfig,
    ) -> Result<Box<dyn Step>, WorkflowError>;
}

impl<F> StepFactory for F
where
    F: Fn(&StepDefinition, &EngineConfig) -> Result<Box<dyn Step>, WorkflowError> + Send + Sync,
{
    fn create(
        &self,
        definition: &StepDefinition,
        config: &EngineConfig,
    ) -> Result<Box<dyn Step>, WorkflowError> {
        self(definition, config)
    }
}

/// Deserialize a definition's payload, naming the step on failure.
pub fn payload<T: serde::de::DeserializeOwned>(
    definition: &StepDefinition,
) -> Result<T, WorkflowError> {
    definition
        .payload_as()
        .map_err(|e| WorkflowError::InvalidDefinition {
            step_id: definition.id.clone(),
            message: e.to_string(),
        })
}

fn script_step(def: &StepDefinition, config: &EngineConfig) -> Result<Box<dyn Step>, WorkflowError> {
    let payload: ScriptConfig = payload(def)?;
    Ok(Box::new(
        ScriptStep::new(StepMeta::from(def), payload.script)
            .with_sandbox(ScriptSandbox::from_config(config)),
    ))
}

fn command_step(def: &StepDefinition, config: &EngineConfig) -> Result<Box<dyn Step>, WorkflowError> {
    let payload: CommandConfig = payload(def)?;
    Ok(Box::new(CommandStep::from_config(
        StepMeta::from(def),
        payload,
        config,
    )))
}

fn apdu_step(def: &StepDefinition, config: &EngineConfig) -> Result<Box<dyn Step>, WorkflowError> {
    let payload: ApduConfig = payload(def)?;
    Ok(Box::new(ApduStep::from_config(
        StepMeta::from(def),
        payload,
        config,
    )))
}

fn dialog_step(def: &StepDefinition, _config: &EngineConfig) -> Result<Box<dyn Step>, WorkflowError> {
    let payload: DialogConfig = payload(def)?;
    Ok(Box::new(DialogStep::new(StepMeta::from(def), payload.fields)))
}

fn confirmation_step(
    def: &StepDefinition,
    _config: &EngineConfig,
) -> Result<Box<dyn Step>, WorkflowError> {
    let message = def
        .description
        .clone()
        .unwrap_or_else(|| "Continue?".to_string());
    Ok(Box::new(ConfirmationStep::new(StepMeta::from(def), message)))
}

/// Registry of step factories keyed by type tag.
#[derive(Clone)]
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in step types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("script", script_step);
        registry.register("command", command_step);
        registry.register("apdu", apdu_step);
        registry.register("dialog", dialog_step);
        registry.register("confirmation", confirmation_step);
        registry
    }

    /// Register a factory, replacing any previous one for the same tag.
    pub fn register<F: StepFactory + 'static>(&mut self, step_type: impl Into<String>, factory: F) {
        self.factories.insert(step_type.into(), Arc::new(factory));
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepFactory>> {
        self.factories.get(step_type).cloned()
    }

    pub fn has(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    /// Registered type tags, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Build the step for a definition.
    pub fn create(
        &self,
        definition: &StepDefinition,
        config: &EngineConfig,
    ) -> Result<Box<dyn Step>, WorkflowError> {
        let factory = self
            .get(&definition.step_type)
            .ok_or_else(|| WorkflowError::UnknownStepType {
                step_id: definition.id.clone(),
                step_type: definition.step_type.clone(),
            })?;
        factory.create(definition, config)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("types", &self.list())
            .finish()
    }
}
