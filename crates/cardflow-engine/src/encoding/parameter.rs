//! Dispatch from a parameter definition to the matching encoder.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::aid::AidBuilder;
use super::template::{FieldEncoderRegistry, TemplateProcessor};
use super::tlv::TlvBuilder;
use crate::error::EncodingError;
use crate::sandbox::ScriptSandbox;
use crate::schema::{AidConstruction, EncodingKind, ParameterDefinition};
use crate::Values;

/// Output of [`ParameterEncoder::encode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedParameters {
    /// Encoded install parameters (hex).
    pub param_string: String,

    /// AID for the installer's create option, if the definition names one.
    pub create_aid: Option<String>,
}

/// Encodes field values into installation parameters.
#[derive(Debug, Clone)]
pub struct ParameterEncoder {
    definition: ParameterDefinition,
    encoders: Arc<FieldEncoderRegistry>,
    sandbox: ScriptSandbox,
}

impl ParameterEncoder {
    pub fn new(definition: ParameterDefinition) -> Self {
        Self {
            definition,
            encoders: Arc::new(FieldEncoderRegistry::new()),
            sandbox: ScriptSandbox::default(),
        }
    }

    /// Use a shared field encoder registry for template placeholders.
    pub fn with_encoders(mut self, encoders: Arc<FieldEncoderRegistry>) -> Self {
        self.encoders = encoders;
        self
    }

    /// Run custom builders in the given sandbox.
    pub fn with_sandbox(mut self, sandbox: ScriptSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn definition(&self) -> &ParameterDefinition {
        &self.definition
    }

    /// Encode field values according to the definition's encoding kind.
    pub fn encode(&self, values: &Values) -> Result<EncodedParameters, EncodingError> {
        let def = &self.definition;

        let param_string = match def.encoding {
            EncodingKind::None => String::new(),
            EncodingKind::Template => match &def.template {
                Some(template) => TemplateProcessor::process_with(template, values, &self.encoders),
                None => String::new(),
            },
            EncodingKind::Tlv => TlvBuilder::build(&def.tlv_structure, values)?,
            EncodingKind::Custom => match &def.builder {
                Some(code) => self.sandbox.run_builder(code, values)?,
                None => String::new(),
            },
        };

        let create_aid = def.create_aid.as_ref().map(|aid| {
            if TemplateProcessor::is_template(aid) {
                TemplateProcessor::process_with(aid, values, &self.encoders)
            } else {
                aid.clone()
            }
        });

        tracing::debug!(
            encoding = ?def.encoding,
            length = param_string.len() / 2,
            "Encoded install parameters"
        );

        Ok(EncodedParameters {
            param_string,
            create_aid,
        })
    }

    /// Build a dynamic AID outside the parameter path.
    pub fn build_aid(
        &self,
        construction: &AidConstruction,
        values: &Values,
    ) -> Result<String, EncodingError> {
        AidBuilder::build_from(construction, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AidSegment, TlvEntry};
    use serde_json::{json, Value};

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_encode_none() {
        let encoder = ParameterEncoder::new(ParameterDefinition::default());
        let out = encoder.encode(&Values::new()).unwrap();
        assert_eq!(out, EncodedParameters::default());
    }

    #[test]
    fn test_encode_template() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Template,
            template: Some("C9{data_length:02X}{data_hex}".into()),
            create_aid: Some("A0000001510000".into()),
            ..Default::default()
        });
        let out = encoder.encode(&values(&[("data", json!("Hi"))])).unwrap();
        assert_eq!(out.param_string, "C9024869");
        assert_eq!(out.create_aid.as_deref(), Some("A0000001510000"));
    }

    #[test]
    fn test_encode_template_with_custom_encoder() {
        let mut registry = FieldEncoderRegistry::new();
        registry.register("flags", |v: Option<&Value>| {
            if v.and_then(Value::as_bool).unwrap_or(false) {
                "01".to_string()
            } else {
                "00".to_string()
            }
        });
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Template,
            template: Some("{flags}".into()),
            ..Default::default()
        })
        .with_encoders(Arc::new(registry));

        let out = encoder.encode(&Values::new()).unwrap();
        assert_eq!(out.param_string, "00");
    }

    #[test]
    fn test_encode_tlv() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Tlv,
            tlv_structure: vec![
                TlvEntry::new("81", "{key}"),
                TlvEntry::new("82", "{missing}"),
                TlvEntry::new("83", "{pin_ascii_hex}"),
            ],
            ..Default::default()
        });
        let out = encoder
            .encode(&values(&[("key", json!("AA BB")), ("pin", json!("12"))]))
            .unwrap();
        assert_eq!(out.param_string, "8102AABB83023132");
    }

    #[test]
    fn test_encode_tlv_overflow() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Tlv,
            tlv_structure: vec![TlvEntry::new("81", "{blob}")],
            ..Default::default()
        });
        let err = encoder
            .encode(&values(&[("blob", json!("AA".repeat(256)))]))
            .unwrap_err();
        assert!(matches!(err, EncodingError::TlvOverflow { .. }));
    }

    #[test]
    fn test_encode_custom() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Custom,
            builder: Some(r#"result = "01" + pad_hex(field_values.count.to_string(), 2);"#.into()),
            ..Default::default()
        });
        let out = encoder.encode(&values(&[("count", json!(12))])).unwrap();
        assert_eq!(out.param_string, "010012");
    }

    #[test]
    fn test_encode_custom_rejects_blocked_names() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            encoding: EncodingKind::Custom,
            builder: Some(r#"result = open("/etc/passwd");"#.into()),
            ..Default::default()
        });
        assert!(matches!(
            encoder.encode(&Values::new()),
            Err(EncodingError::Sandbox(_))
        ));
    }

    #[test]
    fn test_create_aid_template() {
        let encoder = ParameterEncoder::new(ParameterDefinition {
            create_aid: Some("A000000151{instance}".into()),
            ..Default::default()
        });
        let out = encoder.encode(&values(&[("instance", json!("01"))])).unwrap();
        assert_eq!(out.create_aid.as_deref(), Some("A00000015101"));
    }

    #[test]
    fn test_build_aid() {
        let encoder = ParameterEncoder::new(ParameterDefinition::default());
        let construction = AidConstruction {
            base: "D2760001".into(),
            segments: vec![AidSegment::new("data", 2).from_field("data")],
        };
        let aid = encoder
            .build_aid(&construction, &values(&[("data", json!("AABBCCDD"))]))
            .unwrap();
        assert_eq!(aid, "D2760001AABB");
    }
}
