//! Input collection and confirmation steps.
//!
//! Presentation lives behind [`InputProvider`](crate::services::InputProvider).
//! In headless mode neither step talks to a provider: dialogs resolve from
//! context values and field defaults, confirmations are accepted.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{Step, StepMeta};
use crate::context::{WorkflowContext, INDETERMINATE};
use crate::encoding::value::stringify;
use crate::encoding::TemplateProcessor;
use crate::error::StepError;
use crate::result::StepResult;
use crate::schema::{FieldDefinition, FieldValidation};
use crate::services::{InputOutcome, INPUT_PROVIDER};
use crate::Values;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DialogConfig {
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Collects field values and stores them in the context.
#[derive(Debug, Clone)]
pub struct DialogStep {
    meta: StepMeta,
    title: String,
    fields: Vec<FieldDefinition>,
}

impl DialogStep {
    pub fn new(meta: StepMeta, fields: Vec<FieldDefinition>) -> Self {
        let title = meta.name.clone();
        Self {
            meta,
            title,
            fields,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    fn resolve_headless(&self, ctx: &WorkflowContext) -> Result<Values, String> {
        let mut values = Values::new();
        let mut missing = Vec::new();

        for field in &self.fields {
            let value = ctx
                .get(&field.id)
                .filter(|v| !v.is_null())
                .or(field.default.as_ref());
            match value {
                Some(value) => {
                    values.insert(field.id.clone(), value.clone());
                }
                None if field.required => missing.push(field.id.as_str()),
                None => {}
            }
        }

        if !missing.is_empty() {
            return Err(format!(
                "Required fields missing in headless mode: {}",
                missing.join(", ")
            ));
        }

        for field in &self.fields {
            if let (Some(rules), Some(value)) = (&field.validation, values.get(&field.id)) {
                check_field(&field.id, rules, value)?;
            }
        }
        Ok(values)
    }
}

/// Check a value against a field's validation rules.
fn check_field(id: &str, rules: &FieldValidation, value: &Value) -> Result<(), String> {
    let text = stringify(value);
    let invalid = |detail: String| {
        Err(rules
            .message
            .clone()
            .map(|m| format!("Invalid value for '{}': {}", id, m))
            .unwrap_or_else(|| format!("Invalid value for '{}': {}", id, detail)))
    };

    let length = text.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            return invalid(format!("at least {} characters required", min));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            return invalid(format!("at most {} characters allowed", max));
        }
    }
    if let Some(pattern) = &rules.pattern {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| format!("Invalid validation pattern for '{}': {}", id, e))?;
        if !re.is_match(&text) {
            return invalid(format!("does not match {}", pattern));
        }
    }
    Ok(())
}

fn store_values(ctx: &mut WorkflowContext, values: &Values) {
    for (key, value) in values {
        ctx.set(key.clone(), value.clone());
    }
}

#[async_trait]
impl Step for DialogStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn step_type(&self) -> &str {
        "dialog"
    }

    fn validate(&self, _ctx: &WorkflowContext) -> Option<String> {
        if self.fields.is_empty() {
            return Some("No fields specified for dialog".to_string());
        }
        None
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError> {
        ctx.report_progress(
            &self.meta.message_or(|name| format!("Waiting for input: {}...", name)),
            INDETERMINATE,
        );

        if ctx.is_headless() {
            return Ok(match self.resolve_headless(ctx) {
                Ok(values) => {
                    store_values(ctx, &values);
                    StepResult::success(Value::Object(values.into_iter().collect()))
                }
                Err(message) => StepResult::error(message),
            });
        }

        let provider = ctx
            .input_provider()
            .ok_or_else(|| StepError::MissingService(INPUT_PROVIDER.to_string()))?;

        let prefill: Values = self
            .fields
            .iter()
            .filter_map(|f| ctx.get(&f.id).map(|v| (f.id.clone(), v.clone())))
            .collect();

        match provider.request_values(&self.title, &self.fields, &prefill).await? {
            InputOutcome::Accepted(values) => {
                store_values(ctx, &values);
                // Text answers also get their hex and length forms.
                for (key, value) in &values {
                    if let Value::String(text) = value {
                        ctx.set(
                            format!("{}_hex", key),
                            Value::String(hex::encode_upper(text.as_bytes())),
                        );
                        ctx.set(format!("{}_length", key), Value::from(text.chars().count()));
                    }
                }
                Ok(StepResult::success(Value::Object(values.into_iter().collect())))
            }
            InputOutcome::Cancelled => Ok(StepResult::error("User cancelled the dialog")),
        }
    }
}

/// Asks a yes/no question; a decline fails the step.
#[derive(Debug, Clone)]
pub struct ConfirmationStep {
    meta: StepMeta,
    title: String,
    message: String,
}

impl ConfirmationStep {
    pub fn new(meta: StepMeta, message: impl Into<String>) -> Self {
        Self {
            meta,
            title: "Confirm".to_string(),
            message: message.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
impl Step for ConfirmationStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn step_type(&self) -> &str {
        "confirmation"
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError> {
        ctx.report_progress(
            &self.meta.message_or(|name| format!("Confirmation required: {}...", name)),
            INDETERMINATE,
        );

        if ctx.is_headless() {
            return Ok(StepResult::success(Value::Bool(true)));
        }

        let provider = ctx
            .input_provider()
            .ok_or_else(|| StepError::MissingService(INPUT_PROVIDER.to_string()))?;
        let message = TemplateProcessor::process(&self.message, &ctx.get_all_variables());

        if provider.confirm(&self.title, &message).await? {
            Ok(StepResult::success(Value::Bool(true)))
        } else {
            Ok(StepResult::error("User declined"))
        }
    }
}
