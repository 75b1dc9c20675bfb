//! Tag-Length-Value assembly.

use crate::error::EncodingError;
use crate::schema::TlvEntry;
use crate::Values;

use super::template::TemplateProcessor;
use super::value::strip_non_hex;

/// Value of a single TLV entry: raw bytes or a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvValue {
    Bytes(Vec<u8>),
    Hex(String),
}

impl From<&str> for TlvValue {
    fn from(s: &str) -> Self {
        TlvValue::Hex(s.to_string())
    }
}

impl From<String> for TlvValue {
    fn from(s: String) -> Self {
        TlvValue::Hex(s)
    }
}

impl From<Vec<u8>> for TlvValue {
    fn from(b: Vec<u8>) -> Self {
        TlvValue::Bytes(b)
    }
}

impl From<&[u8]> for TlvValue {
    fn from(b: &[u8]) -> Self {
        TlvValue::Bytes(b.to_vec())
    }
}

/// Builds hex-encoded TLV structures.
pub struct TlvBuilder;

impl TlvBuilder {
    /// Build the concatenated TLV hex string for the given entries.
    ///
    /// Each value is template-processed and reduced to its hex digits.
    /// Entries whose value resolves to nothing are skipped.
    pub fn build(entries: &[TlvEntry], values: &Values) -> Result<String, EncodingError> {
        let mut out = String::new();
        for entry in entries {
            let processed = TemplateProcessor::process(&entry.value, values);
            let value_hex = strip_non_hex(&processed);
            if value_hex.is_empty() {
                continue;
            }
            out.push_str(&build_entry(&entry.tag, &value_hex, entry.length_bytes)?);
        }
        Ok(out)
    }

    /// Build a single TLV entry.
    pub fn build_single(
        tag: &str,
        value: impl Into<TlvValue>,
        length_bytes: u8,
    ) -> Result<String, EncodingError> {
        let value_hex = match value.into() {
            TlvValue::Bytes(bytes) => hex::encode_upper(bytes),
            TlvValue::Hex(s) => strip_non_hex(&s),
        };
        build_entry(tag, &value_hex, length_bytes)
    }
}

fn build_entry(tag: &str, value_hex: &str, length_bytes: u8) -> Result<String, EncodingError> {
    let tag = tag.to_uppercase();

    if value_hex.len() % 2 != 0 {
        return Err(EncodingError::OddHexLength {
            context: format!("TLV value for tag {}", tag),
            length: value_hex.len(),
        });
    }
    let length = value_hex.len() / 2;

    let length_hex = match length_bytes {
        1 | 2 => {
            let max = if length_bytes == 1 { 0xFF } else { 0xFFFF };
            if length > max {
                return Err(EncodingError::TlvOverflow {
                    tag,
                    width: length_bytes,
                    length,
                    max,
                });
            }
            format!("{:0width$X}", length, width = usize::from(length_bytes) * 2)
        }
        other => return Err(EncodingError::UnsupportedLengthWidth(other)),
    };

    Ok(format!("{}{}{}", tag, length_hex, value_hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_single() {
        assert_eq!(TlvBuilder::build_single("81", "AABB", 1).unwrap(), "8102AABB");
        assert_eq!(
            TlvBuilder::build_single("c9", vec![0x01u8, 0x02], 1).unwrap(),
            "C9020102"
        );
    }

    #[test]
    fn test_two_byte_length() {
        let value = vec![0u8; 256];
        let tlv = TlvBuilder::build_single("81", value, 2).unwrap();
        assert!(tlv.starts_with("810100"));
        assert_eq!(tlv.len(), 2 + 4 + 512);
    }

    #[test]
    fn test_one_byte_overflow() {
        let value = vec![0u8; 256];
        let err = TlvBuilder::build_single("81", value, 1).unwrap_err();
        assert!(matches!(err, EncodingError::TlvOverflow { length: 256, .. }));
    }

    #[test]
    fn test_two_byte_overflow() {
        let value = vec![0u8; 65536];
        let err = TlvBuilder::build_single("81", value, 2).unwrap_err();
        assert!(matches!(
            err,
            EncodingError::TlvOverflow {
                length: 65536,
                max: 0xFFFF,
                ..
            }
        ));

        let value = vec![0u8; 65535];
        let tlv = TlvBuilder::build_single("81", value, 2).unwrap();
        assert!(tlv.starts_with("81FFFF"));
    }

    #[test]
    fn test_unsupported_width() {
        let err = TlvBuilder::build_single("81", "AA", 3).unwrap_err();
        assert_eq!(err, EncodingError::UnsupportedLengthWidth(3));
    }

    #[test]
    fn test_odd_hex_rejected() {
        let err = TlvBuilder::build_single("81", "ABC", 1).unwrap_err();
        assert!(matches!(err, EncodingError::OddHexLength { length: 3, .. }));
    }

    #[test]
    fn test_build_rejects_odd_value() {
        let entries = vec![TlvEntry::new("81", "{key}"), TlvEntry::new("82", "AA")];
        let values: Values = [("key".to_string(), json!("ABC"))].into_iter().collect();

        let err = TlvBuilder::build(&entries, &values).unwrap_err();
        match err {
            EncodingError::OddHexLength { context, length } => {
                assert_eq!(length, 3);
                assert!(context.contains("81"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_build_skips_empty_entries() {
        let entries = vec![
            TlvEntry::new("81", "{key}"),
            TlvEntry::new("82", "{missing}"),
            TlvEntry::new("83", "{size:04X}").with_length_bytes(2),
        ];
        let values: Values = [
            ("key".to_string(), json!("00 11 22")),
            ("size".to_string(), json!(4096)),
        ]
        .into_iter()
        .collect();

        let tlv = TlvBuilder::build(&entries, &values).unwrap();
        assert_eq!(tlv, "81030011228300021000");
    }
}
