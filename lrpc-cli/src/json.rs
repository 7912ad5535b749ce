//! Conversion between command-line JSON and wire values.

use lrpc_proto::{NumberKind, Value};
use serde_json::{Map, Number, Value as Json};

/// Parses an argument as JSON, falling back to a plain string.
pub fn parse_arg(s: &str) -> Value {
    serde_json::from_str::<Json>(s).map_or_else(|_| Value::from(s), from_json)
}

/// Converts JSON to a value. Arrays become tables keyed from 1.
pub fn from_json(j: Json) -> Value {
    match j {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::from(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::integer(i),
            None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::from(s),
        Json::Array(items) => Value::list(items.into_iter().map(from_json)),
        Json::Object(map) => Value::table(map.into_iter().map(|(k, v)| (k, from_json(v)))),
    }
}

/// Converts a value to JSON for printing.
///
/// Tables keyed exactly `1..=n` print as arrays; other keys are
/// stringified. Non-UTF-8 strings and blobs print as byte arrays.
#[allow(clippy::cast_possible_truncation)]
pub fn to_json(v: &Value) -> Json {
    match v {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Number(n) if n.kind == NumberKind::Integer && n.value.fract() == 0.0 => {
            Json::from(n.value as i64)
        }
        Value::Number(n) => Number::from_f64(n.value).map_or(Json::Null, Json::Number),
        Value::String(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Json::String(s.to_owned()),
            Err(_) => Json::from(bytes.clone()),
        },
        Value::Blob(bytes) => Json::from(bytes.clone()),
        Value::Remote(path) => Json::String(format!("<remote {path}>")),
        Value::Table(pairs) if is_sequence(pairs) => {
            Json::Array(pairs.iter().map(|(_, v)| to_json(v)).collect())
        }
        Value::Table(pairs) => {
            let mut map = Map::new();
            for (k, v) in pairs {
                let key = k.as_str().map_or_else(|| k.to_string(), str::to_owned);
                map.insert(key, to_json(v));
            }
            Json::Object(map)
        }
        _ => Json::Null,
    }
}

#[allow(clippy::cast_precision_loss)]
fn is_sequence(pairs: &[(Value, Value)]) -> bool {
    !pairs.is_empty()
        && pairs
            .iter()
            .zip(1..)
            .all(|((k, _), i)| k.as_f64() == Some(i as f64))
}
