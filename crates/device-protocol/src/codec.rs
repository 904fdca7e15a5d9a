//! Type codec: [`DeviceDatum`] slices ⇄ the wire JSON array
//! `[{ "identifier", "type", "value" }, ...]`.
//!
//! The two directions are deliberately asymmetric.  Encoding outbound
//! telemetry never fails on an odd type or a non-numeric number (unknown
//! types are tagged `"invalid"`, unparsable numbers become `0`); the only
//! hard failure is a Struct/Array value that is not JSON, which aborts the
//! whole batch.  Decoding inbound commands rejects anything it cannot parse.

use serde_json::{Map, Number, Value};

use crate::datum::{DataType, DeviceDatum, MAX_KEY_LEN};
use crate::error::ErrorCode;

/// Codec failures.  Both map to [`ErrorCode::InvalidParameter`] on the wire.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("value of '{key}' is not valid JSON for a {data_type} field")]
    MalformedStructuredValue { key: String, data_type: DataType },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl CodecError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidParameter
    }
}

// ── Encode ───────────────────────────────────────────────────────────

/// Encode a batch of data into a JSON array.
///
/// Fails as a whole if any Struct/Array value is not valid JSON: a partial
/// array would be ambiguous to the receiver.
pub fn encode(data: &[DeviceDatum]) -> Result<Value, CodecError> {
    data.iter()
        .map(encode_item)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn encode_item(datum: &DeviceDatum) -> Result<Value, CodecError> {
    let mut item = Map::with_capacity(3);
    item.insert("identifier".into(), Value::String(datum.key.clone()));
    item.insert("type".into(), Value::String(datum.data_type.as_str().into()));
    item.insert("value".into(), encode_value(datum)?);
    Ok(Value::Object(item))
}

fn encode_value(datum: &DeviceDatum) -> Result<Value, CodecError> {
    let raw = datum.value.as_str();
    let value = match datum.data_type {
        DataType::Int | DataType::Bool | DataType::Enum => {
            Value::Number(parse_integer(&datum.key, raw).into())
        }
        DataType::Float | DataType::Double => float_value(&datum.key, raw),
        DataType::Text | DataType::Date => Value::String(raw.to_owned()),
        DataType::Struct | DataType::Array => {
            serde_json::from_str(raw).map_err(|_| CodecError::MalformedStructuredValue {
                key: datum.key.clone(),
                data_type: datum.data_type,
            })?
        }
        DataType::Invalid => Value::String(raw.to_owned()),
    };
    Ok(value)
}

fn parse_integer(key: &str, raw: &str) -> i64 {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return v;
    }
    match trimmed {
        "true" => return 1,
        "false" => return 0,
        _ => {}
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return f.trunc() as i64;
        }
    }
    tracing::warn!(key = %key, value = %raw, "non-numeric value encoded as 0");
    0
}

fn parse_float(key: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(f) if f.is_finite() => f,
        _ => {
            tracing::warn!(key = %key, value = %raw, "non-numeric value encoded as 0");
            0.0
        }
    }
}

/// Whole numbers go out as JSON integers so their text survives a round trip.
fn float_value(key: &str, raw: &str) -> Value {
    match raw.trim().parse::<i64>() {
        Ok(whole) => Value::Number(whole.into()),
        Err(_) => number_from_f64(parse_float(key, raw)),
    }
}

fn number_from_f64(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(0.into()))
}

// ── Decode ───────────────────────────────────────────────────────────

/// Decode a wire array back into data.
///
/// Plain string elements are key-only entries (a GET naming properties);
/// object elements must carry `identifier`, a recognized `type`, and `value`.
pub fn decode(json: &Value) -> Result<Vec<DeviceDatum>, CodecError> {
    let items = json
        .as_array()
        .ok_or_else(|| CodecError::InvalidParameter("expected a JSON array".into()))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| decode_item(index, item))
        .collect()
}

fn decode_item(index: usize, item: &Value) -> Result<DeviceDatum, CodecError> {
    match item {
        Value::String(key) => {
            check_key(index, key)?;
            Ok(DeviceDatum::key_only(key.as_str()))
        }
        Value::Object(obj) => {
            let key = obj
                .get("identifier")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(index, "missing string 'identifier'"))?;
            check_key(index, key)?;

            let type_name = obj
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(index, "missing string 'type'"))?;
            let data_type = DataType::from_name(type_name)
                .ok_or_else(|| invalid(index, &format!("unknown type '{type_name}'")))?;

            let value = obj
                .get("value")
                .ok_or_else(|| invalid(index, "missing 'value'"))?;
            let text = value_to_text(data_type, value)
                .ok_or_else(|| invalid(index, &format!("value is not a valid {data_type}")))?;

            let datum = DeviceDatum::new(key, data_type, text);
            datum.check_limits().map_err(CodecError::InvalidParameter)?;
            Ok(datum)
        }
        _ => Err(invalid(index, "element is neither a string nor an object")),
    }
}

fn check_key(index: usize, key: &str) -> Result<(), CodecError> {
    if key.is_empty() {
        return Err(invalid(index, "empty identifier"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid(index, &format!("identifier exceeds {MAX_KEY_LEN} bytes")));
    }
    Ok(())
}

fn invalid(index: usize, what: &str) -> CodecError {
    CodecError::InvalidParameter(format!("element {index}: {what}"))
}

/// Flatten a typed JSON value back to its text form.
fn value_to_text(data_type: DataType, value: &Value) -> Option<String> {
    match data_type {
        DataType::Int | DataType::Enum => integer_text(value),
        DataType::Bool => match value {
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            other => integer_text(other),
        },
        DataType::Float | DataType::Double => float_text(value),
        DataType::Text | DataType::Date => value.as_str().map(str::to_owned),
        DataType::Struct | DataType::Array => serde_json::to_string(value).ok(),
        DataType::Invalid => None,
    }
}

fn float_text(value: &Value) -> Option<String> {
    let n = value.as_number()?;
    if n.is_i64() || n.is_u64() {
        return Some(n.to_string());
    }
    // f64 Display drops a zero fraction: 25.0 -> "25".
    n.as_f64().map(|f| f.to_string())
}

fn integer_text(value: &Value) -> Option<String> {
    let n = value.as_number()?;
    if n.is_i64() || n.is_u64() {
        return Some(n.to_string());
    }
    n.as_f64().map(|f| (f.trunc() as i64).to_string())
}
