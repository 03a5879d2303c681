//! Bridges between `serde_json::Value` (the catalog/dispatch currency) and
//! `rhai::Dynamic` (the sandbox currency).

use rhai::{Array, Dynamic, ImmutableString, Map};
use serde_json::{Map as JsonMap, Number, Value};

pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(flag) => (*flag).into(),
        // Integers that fit i64 stay integers; everything else goes
        // through f64, possibly losing precision for huge u64 values.
        Value::Number(number) => number
            .as_i64()
            .map(Dynamic::from)
            .or_else(|| number.as_f64().map(Dynamic::from))
            .unwrap_or(Dynamic::UNIT),
        Value::String(text) => text.clone().into(),
        Value::Array(items) => items.iter().map(to_dynamic).collect::<Array>().into(),
        Value::Object(fields) => fields
            .iter()
            .map(|(key, value)| (key.as_str().into(), to_dynamic(value)))
            .collect::<Map>()
            .into(),
    }
}

pub fn from_dynamic(value: Dynamic) -> Value {
    if value.is::<()>() {
        Value::Null
    } else if value.is::<bool>() {
        value.as_bool().map(Value::Bool).unwrap_or(Value::Null)
    } else if value.is::<i64>() {
        value.as_int().map(Value::from).unwrap_or(Value::Null)
    } else if value.is::<f64>() {
        // NaN and infinities have no JSON representation.
        value
            .as_float()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if value.is::<ImmutableString>() {
        value
            .into_immutable_string()
            .map(|text| Value::String(text.to_string()))
            .unwrap_or(Value::Null)
    } else if value.is::<Array>() {
        value
            .try_cast::<Array>()
            .map(|items| Value::Array(items.into_iter().map(from_dynamic).collect()))
            .unwrap_or(Value::Null)
    } else if value.is::<Map>() {
        value
            .try_cast::<Map>()
            .map(|fields| {
                let mut json_map = JsonMap::new();
                for (key, value) in fields {
                    json_map.insert(key.into(), from_dynamic(value));
                }
                Value::Object(json_map)
            })
            .unwrap_or(Value::Null)
    } else {
        // Host-only types never cross back into dispatch parameters.
        Value::Null
    }
}

/// Convert a rhai object-map of named arguments into a JSON parameter map.
pub fn map_to_json(map: Map) -> JsonMap<String, Value> {
    let mut json_map = JsonMap::new();
    for (key, value) in map {
        json_map.insert(key.into(), from_dynamic(value));
    }
    json_map
}
