//! Placeholder templates with conditional sections.
//!
//! Supported syntax:
//! - `{name}` and `{name:02X}` substitute a value, optionally formatted
//! - `{name_hex}`, `{name_ascii_hex}` hex-encode a value
//! - `{name_length}`, `{a+b_length}`, `{name_ascii_length}` compute lengths
//! - `{?name}...{/name}` keeps its content only if `name` is truthy

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::value::{format_value, is_truthy, stringify, to_ascii_hex, to_hex};
use crate::Values;

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([\w+]+)(?::([^}]+))?\}").expect("valid placeholder regex"));

static COND_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\?(\w+)\}").expect("valid conditional regex"));

/// Encoder for a single field, given the field's value (if any).
pub type FieldEncoder = Arc<dyn Fn(Option<&Value>) -> String + Send + Sync>;

/// Field name to encoder mapping, consulted for placeholders that match no
/// value and no computed suffix.
#[derive(Clone, Default)]
pub struct FieldEncoderRegistry {
    encoders: HashMap<String, FieldEncoder>,
}

impl FieldEncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an encoder for a field name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, encoder: F)
    where
        F: Fn(Option<&Value>) -> String + Send + Sync + 'static,
    {
        self.encoders.insert(name.into(), Arc::new(encoder));
    }

    pub fn get(&self, name: &str) -> Option<&FieldEncoder> {
        self.encoders.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.encoders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.encoders.keys().map(|s| s.as_str()).collect()
    }
}

impl fmt::Debug for FieldEncoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEncoderRegistry")
            .field("encoders", &self.names())
            .finish()
    }
}

/// Template processor for parameter strings, APDU templates and command
/// arguments.
pub struct TemplateProcessor;

impl TemplateProcessor {
    /// Process a template against the given values.
    pub fn process(template: &str, values: &Values) -> String {
        Self::render(template, values, None)
    }

    /// Process a template, consulting custom field encoders.
    pub fn process_with(template: &str, values: &Values, encoders: &FieldEncoderRegistry) -> String {
        Self::render(template, values, Some(encoders))
    }

    /// Check if a string contains placeholder syntax.
    pub fn is_template(s: &str) -> bool {
        VAR_PATTERN.is_match(s) || COND_OPEN.is_match(s)
    }

    fn render(template: &str, values: &Values, encoders: Option<&FieldEncoderRegistry>) -> String {
        let expanded = process_conditionals(template, values);
        VAR_PATTERN
            .replace_all(&expanded, |caps: &Captures| {
                let name = &caps[1];
                let spec = caps.get(2).map(|m| m.as_str());
                resolve(name, spec, values, encoders)
            })
            .into_owned()
    }
}

/// Keep or drop `{?name}...{/name}` sections. Content is kept verbatim;
/// placeholders inside it are resolved by the variable pass.
fn process_conditionals(template: &str, values: &Values) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = COND_OPEN.captures(rest) {
        let (start, end) = match open.get(0) {
            Some(m) => (m.start(), m.end()),
            None => break,
        };
        let name = &open[1];
        let close = format!("{{/{}}}", name);
        let after = &rest[end..];

        match after.find(&close) {
            Some(pos) => {
                out.push_str(&rest[..start]);
                if values.get(name).map(is_truthy).unwrap_or(false) {
                    out.push_str(&after[..pos]);
                }
                rest = &after[pos + close.len()..];
            }
            None => {
                out.push_str(&rest[..end]);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(values: &'a Values, name: &str) -> &'a Value {
    values.get(name).unwrap_or(&Value::Null)
}

fn formatted(value: &Value, spec: Option<&str>) -> String {
    spec.and_then(|s| format_value(value, s))
        .unwrap_or_else(|| stringify(value))
}

fn resolve(
    name: &str,
    spec: Option<&str>,
    values: &Values,
    encoders: Option<&FieldEncoderRegistry>,
) -> String {
    // Exact keys win over every computed suffix.
    if let Some(value) = values.get(name) {
        return formatted(value, spec);
    }

    if let Some(base) = name.strip_suffix("_ascii_hex") {
        return to_ascii_hex(lookup(values, base));
    }

    if let Some(base) = name.strip_suffix("_hex") {
        return to_hex(lookup(values, base));
    }

    if let Some(base) = name.strip_suffix("_ascii_length") {
        let length = stringify(lookup(values, base)).chars().count();
        return formatted(&Value::from(length), spec);
    }

    if let Some(base) = name.strip_suffix("_length") {
        let length: usize = base
            .split('+')
            .map(str::trim)
            .map(|field| to_hex(lookup(values, field)).len() / 2)
            .sum();
        return formatted(&Value::from(length), spec);
    }

    if let Some(encoder) = encoders.and_then(|e| e.get(name)) {
        return encoder(values.get(name));
    }

    formatted(lookup(values, name), spec)
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
    fn test_simple_substitution() {
        let v = values(&[("a", json!("8102")), ("b", json!("00FF"))]);
        assert_eq!(TemplateProcessor::process("{a}{b}", &v), "810200FF");
    }

    #[test]
    fn test_missing_value_is_empty() {
        let v = Values::new();
        assert_eq!(TemplateProcessor::process("A{missing}B", &v), "AB");
    }

    #[test]
    fn test_conditional_sections() {
        let empty = values(&[("x", json!(""))]);
        assert_eq!(TemplateProcessor::process("{?x}Y{/x}", &empty), "");

        let set = values(&[("x", json!("1"))]);
        assert_eq!(TemplateProcessor::process("{?x}Y{/x}", &set), "Y");

        let absent = Values::new();
        assert_eq!(TemplateProcessor::process("A{?x}Y{/x}B", &absent), "AB");
    }

    #[test]
    fn test_conditional_content_is_substituted() {
        let v = values(&[("pin", json!("1234"))]);
        assert_eq!(
            TemplateProcessor::process("{?pin}C1{pin_ascii_length:02X}{pin_ascii_hex}{/pin}", &v),
            "C10431323334"
        );
    }

    #[test]
    fn test_conditional_names_must_match() {
        let v = values(&[("x", json!("1"))]);
        assert_eq!(TemplateProcessor::process("{?x}Y{/z}", &v), "{?x}Y{/z}");
    }

    #[test]
    fn test_hex_suffix() {
        let v = values(&[("data", json!("Hello"))]);
        assert_eq!(TemplateProcessor::process("{data_hex}", &v), "48656C6C6F");

        let v = values(&[("data", json!("aabb"))]);
        assert_eq!(TemplateProcessor::process("{data_hex}", &v), "AABB");
    }

    #[test]
    fn test_ascii_hex_suffix() {
        let v = values(&[("pin", json!("1234"))]);
        assert_eq!(TemplateProcessor::process("{pin_ascii_hex}", &v), "31323334");
    }

    #[test]
    fn test_length_suffix() {
        let v = values(&[("data", json!("AABBCC"))]);
        assert_eq!(TemplateProcessor::process("{data_length:02X}", &v), "03");
        assert_eq!(TemplateProcessor::process("{data_length}", &v), "3");
    }

    #[test]
    fn test_combined_length() {
        let v = values(&[("a", json!("AABB")), ("b", json!("CC"))]);
        assert_eq!(TemplateProcessor::process("{a+b_length:02X}", &v), "03");
    }

    #[test]
    fn test_exact_key_shadows_suffix() {
        let v = values(&[("foo", json!("Hello")), ("foo_hex", json!("LITERAL"))]);
        assert_eq!(TemplateProcessor::process("{foo_hex}", &v), "LITERAL");

        let v = values(&[("data", json!("AABB")), ("data_length", json!(9))]);
        assert_eq!(TemplateProcessor::process("{data_length:02X}", &v), "09");
    }

    #[test]
    fn test_format_spec() {
        let v = values(&[("n", json!(10))]);
        assert_eq!(TemplateProcessor::process("{n:04X}", &v), "000A");
    }

    #[test]
    fn test_bad_format_falls_back_to_plain() {
        let v = values(&[("s", json!("abc"))]);
        assert_eq!(TemplateProcessor::process("{s:02X}", &v), "abc");
    }

    #[test]
    fn test_custom_encoder() {
        let mut encoders = FieldEncoderRegistry::new();
        encoders.register("key", |v: Option<&Value>| match v {
            Some(_) => "SET".to_string(),
            None => "DEFAULT".to_string(),
        });
        let v = Values::new();
        assert_eq!(
            TemplateProcessor::process_with("{key}", &v, &encoders),
            "DEFAULT"
        );
        // Exact values still take precedence over encoders.
        let v = values(&[("key", json!("raw"))]);
        assert_eq!(TemplateProcessor::process_with("{key}", &v, &encoders), "raw");
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateProcessor::is_template("00A4{aid}"));
        assert!(TemplateProcessor::is_template("{?x}a{/x}"));
        assert!(!TemplateProcessor::is_template("00A40400"));
    }
}
