//! Canonical JSON Emitter
//!
//! Deterministic byte image of a `serde_json::Value`:
//! - object keys in ascending Unicode code-point order, recursively
//! - no insignificant whitespace, UTF-8 output
//! - arrays preserve order, explicit null is preserved
//!
//! Producers must carry integers beyond the IEEE-754 safe range as decimal
//! strings; this emitter renders whatever number representation it is given
//! without widening or narrowing it.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::CanonicalError;

/// Serialize a JSON value to its canonical byte image.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut buf = Vec::with_capacity(128);
    write_value(&mut buf, value)?;
    Ok(buf)
}

/// Render a timestamp as ISO-8601 UTC with millisecond precision.
///
/// Example: `2026-03-01T12:00:00.000Z`
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), CanonicalError> {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        // serde_json renders i64/u64 exactly and f64 via the shortest
        // round-trippable decimal form.
        Value::Number(n) => buf.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(buf, s)?,
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item)?;
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            // UTF-8 byte order equals Unicode code-point order.
            keys.sort_unstable();

            buf.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key)?;
                buf.push(b':');
                write_value(buf, &map[key.as_str()])?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), CanonicalError> {
    serde_json::to_writer(&mut *buf, s).map_err(|e| CanonicalError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn canon(value: &Value) -> String {
        String::from_utf8(canonical_json_bytes(value).unwrap()).unwrap()
    }

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": 2, "y": 3}});
        assert_eq!(canon(&value), r#"{"a":{"y":3,"z":2},"b":1}"#);
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"k": [1, 2, {"n": null}]});
        assert_eq!(canon(&value), r#"{"k":[1,2,{"n":null}]}"#);
    }

    #[test]
    fn test_null_preserved() {
        let value = json!({"present": null});
        assert_eq!(canon(&value), r#"{"present":null}"#);
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!(["c", "a", "b"]);
        assert_eq!(canon(&value), r#"["c","a","b"]"#);
    }

    #[test]
    fn test_string_escaping() {
        let value = json!({"s": "line\nbreak \"quoted\""});
        assert_eq!(canon(&value), r#"{"s":"line\nbreak \"quoted\""}"#);
    }

    #[test]
    fn test_deterministic_across_key_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(canonical_json_bytes(&a).unwrap(), canonical_json_bytes(&b).unwrap());
    }

    #[test]
    fn test_big_integers_as_strings_pass_through() {
        let value = json!({"count": "18446744073709551615"});
        assert_eq!(canon(&value), r#"{"count":"18446744073709551615"}"#);
    }

    #[test]
    fn test_timestamp_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(canonical_timestamp(ts), "2026-03-01T12:00:00.000Z");
    }
}
