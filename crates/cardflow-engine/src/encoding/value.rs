//! Conversions between field values and hex/text representations.
//!
//! Field values are JSON values. An array whose elements are all integers in
//! `0..=255` is treated as a byte string.

use serde_json::Value;

/// Interpret a value as raw bytes, if it is a byte array.
pub fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_u64().filter(|n| *n <= 0xFF).map(|n| n as u8))
        .collect()
}

/// Plain stringification used for template substitution.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) => match as_bytes(value) {
            Some(bytes) => hex::encode_upper(bytes),
            None => value.to_string(),
        },
        Value::Object(_) => value.to_string(),
    }
}

/// Returns true if `s` consists only of hex digits (the empty string included).
pub fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Remove every non-hex character and uppercase the rest.
pub fn strip_non_hex(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Hex-encode a value, auto-detecting its shape.
///
/// Bytes are hex encoded, hex-looking strings pass through uppercased, other
/// strings are UTF-8 encoded, integers are rendered in hex directly.
pub fn to_hex(value: &Value) -> String {
    if let Some(bytes) = as_bytes(value) {
        return hex::encode_upper(bytes);
    }
    match value {
        Value::Null => String::new(),
        Value::String(s) if is_hex(s) => s.to_uppercase(),
        Value::String(s) => hex::encode_upper(s.as_bytes()),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => format!("{:X}", u),
            (None, Some(i)) => format!("-{:X}", i.unsigned_abs()),
            _ => hex::encode_upper(n.to_string().as_bytes()),
        },
        other => hex::encode_upper(stringify(other).as_bytes()),
    }
}

/// Hex-encode a value as ASCII text, even if it already looks like hex.
///
/// Non-ASCII characters are replaced by `?`.
pub fn to_ascii_hex(value: &Value) -> String {
    if let Some(bytes) = as_bytes(value) {
        return hex::encode_upper(bytes);
    }
    let ascii: Vec<u8> = stringify(value)
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect();
    hex::encode_upper(ascii)
}

/// Truthiness used by conditional template sections: null, false, zero and
/// empty values are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Option<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && chars[i] == '#' {
        out.alternate = true;
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().ok()?;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        out.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
    }
    if i < chars.len() {
        out.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return None;
    }
    Some(out)
}

fn pad(body: String, spec: &FormatSpec, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let missing = spec.width - len;
    let (fill, align) = match (spec.fill, spec.align) {
        (Some(f), Some(a)) => (f, a),
        (None, Some(a)) => (if spec.zero { '0' } else { ' ' }, a),
        _ if spec.zero => ('0', if numeric { '=' } else { '<' }),
        _ => (' ', if numeric { '>' } else { '<' }),
    };
    let filler = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{}{}", body, filler(missing)),
        '^' => format!(
            "{}{}{}",
            filler(missing / 2),
            body,
            filler(missing - missing / 2)
        ),
        '=' => {
            let (sign, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest.to_string()),
                None => ("", body.clone()),
            };
            format!("{}{}{}", sign, filler(missing), digits)
        }
        _ => format!("{}{}", filler(missing), body),
    }
}

fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::Bool(b) => Some(i128::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        _ => None,
    }
}

/// Apply a Python-style format spec (`02X`, `>8`, `.2f`, ...) to a value.
///
/// Returns `None` when the spec is malformed or does not apply to the value;
/// callers fall back to plain stringification.
pub fn format_value(value: &Value, spec: &str) -> Option<String> {
    let spec = parse_spec(spec)?;
    match spec.kind {
        Some(kind @ ('d' | 'x' | 'X' | 'b' | 'o')) => {
            let n = integer_of(value)?;
            let magnitude = n.unsigned_abs();
            let (digits, prefix) = match kind {
                'd' => (magnitude.to_string(), ""),
                'x' => (format!("{:x}", magnitude), "0x"),
                'X' => (format!("{:X}", magnitude), "0X"),
                'b' => (format!("{:b}", magnitude), "0b"),
                _ => (format!("{:o}", magnitude), "0o"),
            };
            let prefix = if spec.alternate { prefix } else { "" };
            let sign = if n < 0 { "-" } else { "" };
            let body = format!("{}{}{}", sign, prefix, digits);
            Some(pad(body, &spec, true))
        }
        Some('f') => {
            let f = match value {
                Value::Number(n) => n.as_f64()?,
                Value::Bool(b) => f64::from(u8::from(*b)),
                _ => return None,
            };
            let body = format!("{:.*}", spec.precision.unwrap_or(6), f);
            Some(pad(body, &spec, true))
        }
        Some('s') | None => match value {
            Value::String(s) => {
                let body = match spec.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.clone(),
                };
                Some(pad(body, &spec, false))
            }
            Value::Number(_) | Value::Bool(_) if spec.kind.is_none() => {
                Some(pad(stringify(value), &spec, true))
            }
            _ => None,
        },
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_hex_auto_detect() {
        assert_eq!(to_hex(&json!("Hello")), "48656C6C6F");
        assert_eq!(to_hex(&json!("deadbeef")), "DEADBEEF");
        assert_eq!(to_hex(&json!(255)), "FF");
        assert_eq!(to_hex(&json!([0xDE, 0xAD])), "DEAD");
        assert_eq!(to_hex(&json!("")), "");
    }

    #[test]
    fn test_to_ascii_hex() {
        assert_eq!(to_ascii_hex(&json!("1234")), "31323334");
        assert_eq!(to_ascii_hex(&json!(12)), "3132");
        assert_eq!(to_ascii_hex(&json!("é")), "3F");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("1")));
        assert!(is_truthy(&json!(true)));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!(255), "04X").as_deref(), Some("00FF"));
        assert_eq!(format_value(&json!(4), "02X").as_deref(), Some("04"));
        assert_eq!(format_value(&json!(10), "x").as_deref(), Some("a"));
        assert_eq!(format_value(&json!(10), "#x").as_deref(), Some("0xa"));
        assert_eq!(format_value(&json!(-5), "04d").as_deref(), Some("-005"));
        assert_eq!(format_value(&json!("ab"), ">4").as_deref(), Some("  ab"));
        assert_eq!(format_value(&json!(1.5), ".2f").as_deref(), Some("1.50"));
        // Numeric formats do not apply to strings.
        assert_eq!(format_value(&json!("255"), "02X"), None);
        // Malformed specs are rejected.
        assert_eq!(format_value(&json!(1), "02Q!"), None);
    }

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!("x")), "x");
        assert_eq!(stringify(&json!([1, 2])), "0102");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
