//! Deterministic CBOR
//!
//! Converts JSON values into definite-length CBOR with map keys in sorted
//! order. Used for compact proof transport (QR/URL payloads).

use ciborium::Value as CborValue;
use serde_json::Value;

use super::CanonicalError;

/// Convert a JSON value into a CBOR value with sorted map keys.
pub fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                CborValue::Integer(u.into())
            } else if let Some(i) = n.as_i64() {
                CborValue::Integer(i.into())
            } else {
                CborValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            CborValue::Map(
                keys.into_iter()
                    .map(|k| (CborValue::Text(k.clone()), to_cbor_value(&map[k.as_str()])))
                    .collect(),
            )
        }
    }
}

/// Serialize a JSON value to deterministic CBOR bytes.
pub fn canonical_cbor_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    encode(&to_cbor_value(value))
}

/// Serialize an already-ordered CBOR value. Callers are responsible for
/// building maps in sorted key order.
pub(crate) fn encode(value: &CborValue) -> Result<Vec<u8>, CanonicalError> {
    let mut buf = Vec::with_capacity(128);
    ciborium::into_writer(value, &mut buf).map_err(|e| CanonicalError::Cbor(e.to_string()))?;
    Ok(buf)
}
