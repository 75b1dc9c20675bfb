//! Application Identifier construction.

use serde_json::Value;

use crate::error::EncodingError;
use crate::schema::{AidConstruction, AidSegment};
use crate::Values;

use super::value::{as_bytes, stringify, strip_non_hex};

/// Smallest valid AID, in bytes.
pub const MIN_AID_LENGTH: usize = 5;

/// Largest valid AID, in bytes.
pub const MAX_AID_LENGTH: usize = 16;

/// Builds AIDs from a base prefix and fixed-width segments.
pub struct AidBuilder;

impl AidBuilder {
    /// Assemble an AID and check its length.
    pub fn build(base: &str, segments: &[AidSegment], values: &Values) -> Result<String, EncodingError> {
        let mut aid = base.to_uppercase();
        for segment in segments {
            aid.push_str(&segment_value(segment, values));
        }

        let length = aid.len() / 2;
        if !(MIN_AID_LENGTH..=MAX_AID_LENGTH).contains(&length) {
            return Err(EncodingError::InvalidAidLength(length));
        }
        Ok(aid)
    }

    /// Assemble an AID from a construction definition.
    pub fn build_from(construction: &AidConstruction, values: &Values) -> Result<String, EncodingError> {
        Self::build(&construction.base, &construction.segments, values)
    }
}

fn segment_value(segment: &AidSegment, values: &Values) -> String {
    let fallback = segment.default.clone().unwrap_or(Value::Null);
    let value = match segment.source.as_deref().and_then(|s| s.strip_prefix("field:")) {
        Some(field) => values.get(field).cloned().unwrap_or(fallback),
        None => fallback,
    };

    let raw = match &value {
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => match n.as_u64() {
            Some(u) => format!("{:X}", u),
            None => stringify(&value),
        },
        _ => match as_bytes(&value) {
            Some(bytes) => hex::encode_upper(bytes),
            None => stringify(&value),
        },
    };

    let digits = strip_non_hex(&raw);
    let width = segment.length * 2;
    if digits.len() >= width {
        digits[..width].to_string()
    } else {
        format!("{:0>width$}", digits, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_segment_truncation() {
        let segments = vec![AidSegment::new("data", 2).from_field("data")];
        let v = values(&[("data", json!("AABBCCDD"))]);
        assert_eq!(
            AidBuilder::build("D2760001", &segments, &v).unwrap(),
            "D2760001AABB"
        );
    }

    #[test]
    fn test_segment_padding_and_default() {
        let segments = vec![
            AidSegment::new("version", 2).from_field("version"),
            AidSegment::new("instance", 1).with_default("1"),
        ];
        let v = values(&[("version", json!(0x12))]);
        assert_eq!(
            AidBuilder::build("a000000151", &segments, &v).unwrap(),
            "A000000151001201"
        );
    }

    #[test]
    fn test_missing_field_uses_default() {
        let segments = vec![AidSegment::new("id", 2)
            .from_field("id")
            .with_default("BEEF")];
        assert_eq!(
            AidBuilder::build("A0000001", &segments, &Values::new()).unwrap(),
            "A0000001BEEF"
        );
    }

    #[test]
    fn test_bool_segment() {
        let segments = vec![
            AidSegment::new("enabled", 1).from_field("enabled"),
            AidSegment::new("locked", 1).from_field("locked"),
        ];
        let v = values(&[("enabled", json!(true)), ("locked", json!(false))]);
        let aid = AidBuilder::build("A000000151", &segments, &v).unwrap();
        assert_eq!(aid, "A0000001510100");
    }

    #[test]
    fn test_length_bounds() {
        let err = AidBuilder::build("A0000001", &[], &Values::new()).unwrap_err();
        assert_eq!(err, EncodingError::InvalidAidLength(4));
        assert!(err.to_string().contains("4 bytes"));

        let segments = vec![AidSegment::new("pad", 13)];
        let err = AidBuilder::build("A0000001", &segments, &Values::new()).unwrap_err();
        assert_eq!(err, EncodingError::InvalidAidLength(17));
    }

    #[test]
    fn test_build_from_construction() {
        let construction: AidConstruction = serde_json::from_value(json!({
            "base": "A000000151",
            "segments": [{"name": "suffix", "length": 3, "source": "field:suffix"}]
        }))
        .unwrap();
        let v = values(&[("suffix", json!("01-02-03"))]);
        assert_eq!(
            AidBuilder::build_from(&construction, &v).unwrap(),
            "A000000151010203"
        );
    }
}
