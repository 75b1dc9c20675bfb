//! Definition types for workflows, parameter encoding and input fields.
//!
//! These are the shapes a plugin description deserializes into. They are
//! immutable once loaded; the builder turns them into executable steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single step in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step id within the workflow.
    pub id: String,

    /// Step type tag (e.g., "script", "command", "apdu", "dialog").
    #[serde(rename = "type")]
    pub step_type: String,

    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description shown while the step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ids of steps that must run before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Type-specific payload.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl StepDefinition {
    /// Create a definition with an empty payload.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            name: None,
            description: None,
            depends_on: Vec::new(),
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
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

    /// Set a payload entry.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Deserialize the payload into a typed configuration.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// Ordered list of steps, created once per plugin schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self { steps }
    }
}

/// Parameter encoding kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingKind {
    #[default]
    None,
    Template,
    Tlv,
    Custom,
}

/// A single TLV entry for parameter encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlvEntry {
    /// Tag as hex string.
    pub tag: String,

    /// Template for the value.
    pub value: String,

    /// Number of bytes for the length field (1 or 2).
    #[serde(default = "default_length_bytes")]
    pub length_bytes: u8,
}

fn default_length_bytes() -> u8 {
    1
}

impl TlvEntry {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
            length_bytes: 1,
        }
    }

    pub fn with_length_bytes(mut self, length_bytes: u8) -> Self {
        self.length_bytes = length_bytes;
        self
    }
}

/// How to encode installation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(default)]
    pub encoding: EncodingKind,

    /// Template for `template` encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Entries for `tlv` encoding.
    #[serde(default)]
    pub tlv_structure: Vec<TlvEntry>,

    /// Snippet for `custom` encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,

    /// AID to pass to the installer's create option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_aid: Option<String>,
}

/// A segment of a dynamically constructed AID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AidSegment {
    #[serde(default)]
    pub name: String,

    /// Length in bytes.
    pub length: usize,

    /// Source reference, e.g. `field:manufacturer_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Literal default (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AidSegment {
    pub fn new(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            source: None,
            default: None,
        }
    }

    pub fn from_field(mut self, field: &str) -> Self {
        self.source = Some(format!("field:{}", field));
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Rules for dynamically constructing an AID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AidConstruction {
    /// Base AID prefix (hex).
    pub base: String,

    #[serde(default)]
    pub segments: Vec<AidSegment>,
}

/// Types of input fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Password,
    Dropdown,
    Checkbox,
    HexEditor,
    Number,
    File,
    Hidden,
}

/// A single option in a dropdown field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

/// Validation rules for an input field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Definition of a single input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,

    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    #[serde(default)]
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    #[serde(default)]
    pub options: Vec<FieldOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
}

impl FieldDefinition {
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            field_type,
            default: None,
            required: false,
            placeholder: None,
            options: Vec::new(),
            validation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_validation(mut self, validation: FieldValidation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// A lifecycle hook: either a script or a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookDefinition {
    Script { script: String },
    Command { command: Vec<String> },
}

/// All lifecycle hooks of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HooksDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_install: Option<HookDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_install: Option<HookDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_uninstall: Option<HookDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_uninstall: Option<HookDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_definition_from_yaml() {
        let yaml = r#"
id: select
type: apdu
name: Select applet
depends_on: [prepare]
apdu: "00A4040008{aid}"
expected_sw: ["9000"]
"#;
        let def: StepDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "select");
        assert_eq!(def.step_type, "apdu");
        assert_eq!(def.depends_on, vec!["prepare"]);
        assert_eq!(def.payload.get("apdu"), Some(&json!("00A4040008{aid}")));
        assert_eq!(def.payload.get("expected_sw"), Some(&json!(["9000"])));
    }

    #[test]
    fn test_parameter_definition_defaults() {
        let def: ParameterDefinition = serde_json::from_value(json!({
            "encoding": "tlv",
            "tlv_structure": [
                {"tag": "81", "value": "{data}"},
                {"tag": "82", "value": "{size}", "length_bytes": 2}
            ]
        }))
        .unwrap();
        assert_eq!(def.encoding, EncodingKind::Tlv);
        assert_eq!(def.tlv_structure[0].length_bytes, 1);
        assert_eq!(def.tlv_structure[1].length_bytes, 2);
        assert!(def.create_aid.is_none());

        let empty: ParameterDefinition = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.encoding, EncodingKind::None);
    }

    #[test]
    fn test_hook_definition_tagged() {
        let hook: HookDefinition =
            serde_json::from_value(json!({"type": "command", "command": ["echo", "hi"]})).unwrap();
        assert_eq!(
            hook,
            HookDefinition::Command {
                command: vec!["echo".into(), "hi".into()]
            }
        );
    }

    #[test]
    fn test_field_definition_defaults() {
        let field: FieldDefinition =
            serde_json::from_value(json!({"id": "pin", "type": "password", "required": true}))
                .unwrap();
        assert_eq!(field.field_type, FieldType::Password);
        assert!(field.required);
        assert!(field.default.is_none());
    }
}
