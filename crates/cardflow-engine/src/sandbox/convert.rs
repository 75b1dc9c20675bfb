//! Conversion between JSON values and script values.

use rhai::{Array, Blob, Dynamic, Map};
use serde_json::Value;

pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let items: Array = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from_array(items)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if value.is_string() {
        Value::String(value.to_string())
    } else if let Ok(c) = value.as_char() {
        Value::String(c.to_string())
    } else if let Some(arr) = value.clone().try_cast::<Array>() {
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(blob) = value.clone().try_cast::<Blob>() {
        Value::Array(blob.into_iter().map(Value::from).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}
