//! Executable workflow steps.

pub mod apdu;
pub mod command;
pub mod dialog;
pub mod script;

use async_trait::async_trait;

use crate::context::WorkflowContext;
use crate::error::StepError;
use crate::result::StepResult;
use crate::schema::StepDefinition;

pub use apdu::{ApduConfig, ApduStep};
pub use command::{CommandConfig, CommandStep, ALLOWED_COMMANDS};
pub use dialog::{ConfirmationStep, DialogConfig, DialogStep};
pub use script::{ScriptConfig, ScriptStep};

/// Identity and ordering data shared by every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMeta {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
}

impl StepMeta {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Description, or `fallback` when the step has none.
    pub fn message_or(&self, fallback: impl FnOnce(&str) -> String) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| fallback(&self.name))
    }
}

impl From<&StepDefinition> for StepMeta {
    fn from(def: &StepDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone().unwrap_or_else(|| def.id.clone()),
            description: def.description.clone(),
            depends_on: def.depends_on.clone(),
        }
    }
}

/// A unit of work in a workflow.
#[async_trait]
pub trait Step: Send + Sync {
    fn meta(&self) -> &StepMeta;

    /// Step type tag, as used in definitions.
    fn step_type(&self) -> &str;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn description(&self) -> Option<&str> {
        self.meta().description.as_deref()
    }

    fn depends_on(&self) -> &[String] {
        &self.meta().depends_on
    }

    /// Names of services that must be registered before the step runs.
    fn required_services(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Check the step against the context before it runs.
    fn validate(&self, _ctx: &WorkflowContext) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id())
            .field("type", &self.step_type())
            .field("depends_on", &self.depends_on())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_from_definition() {
        let def = StepDefinition::new("install", "command")
            .with_description("Install applet")
            .depends_on(["prepare"]);
        let meta = StepMeta::from(&def);
        assert_eq!(meta.id, "install");
        assert_eq!(meta.name, "install");
        assert_eq!(meta.depends_on, vec!["prepare"]);
        assert_eq!(meta.message_or(|n| format!("Running {}...", n)), "Install applet");

        let meta = StepMeta::new("x").with_name("Do X");
        assert_eq!(meta.message_or(|n| format!("Running {}...", n)), "Running Do X...");
    }
}
