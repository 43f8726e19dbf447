//! Modular device wire protocol.
//!
//! Protocol Overview:
//! - Format: one JSON document per line, terminated by LF (`\n`)
//! - Request: JSON array, method name first, arguments after: `["setWavelengths",[254,280,280,280]]`
//! - Success: `{"id":"setWavelengths","result":null}`
//! - Failure: `{"id":"getDetectorInfo","error":{"message":"...","data":"...","code":-32000}}`
//!
//! Method names on the wire are camelCase. The host-side API uses snake_case
//! names, converted with [`method_name`].

use crate::error::{HplcError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method every modular device answers with its identity.
pub const GET_DEVICE_ID: &str = "getDeviceId";

/// Identity reported by a modular device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Firmware name, e.g. `hplc_controller`.
    pub name: String,
    /// Board form factor, e.g. `3x2`.
    pub form_factor: String,
    /// Serial number distinguishing boards with the same name.
    pub serial_number: u32,
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]#{}", self.name, self.form_factor, self.serial_number)
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    code: Option<i64>,
}

/// Convert a snake_case method name to the camelCase name the firmware expects.
///
/// Names without underscores are returned unchanged, so camelCase input passes
/// through.
pub fn method_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Encode a request line for `method` with positional `args`.
pub fn encode_request(method: &str, args: &[Value]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(args.len() + 1);
    frame.push(Value::String(method.to_string()));
    frame.extend(args.iter().cloned());
    let mut bytes = serde_json::to_vec(&frame)
        .map_err(|e| HplcError::Protocol(format!("cannot encode '{}': {}", method, e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one response line for a request to `method`.
///
/// Returns the `result` value (or `null` when absent), or
/// [`HplcError::Device`] when the device answered with an error object.
pub fn decode_response(method: &str, line: &str) -> Result<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(HplcError::Protocol(format!(
            "empty response to '{}'",
            method
        )));
    }

    let response: Response = serde_json::from_str(trimmed).map_err(|e| {
        HplcError::Protocol(format!(
            "malformed response to '{}': {} (raw: {:?})",
            method, e, trimmed
        ))
    })?;

    if let Some(id) = &response.id {
        if id.as_str() != Some(method) {
            return Err(HplcError::Protocol(format!(
                "response id {} does not match request '{}'",
                id, method
            )));
        }
    }

    if let Some(error) = response.error {
        let mut message = error.message;
        if let Some(data) = error.data {
            let detail = match data {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if !detail.is_empty() {
                message = format!("{} ({})", message, detail);
            }
        }
        if let Some(code) = error.code {
            message = format!("{} [code {}]", message, code);
        }
        return Err(HplcError::Device {
            method: method.to_string(),
            message,
        });
    }

    Ok(response.result.unwrap_or(Value::Null))
}

/// Compare a configured value against one read back from a device.
///
/// Numbers compare by value so that `5` in YAML matches `5.0` from firmware;
/// arrays and objects compare element-wise with the same rule.
pub fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_match(v, other)))
        }
        _ => expected == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_name_conversion() {
        assert_eq!(method_name("get_gradient_info"), "getGradientInfo");
        assert_eq!(method_name("get_detector_info"), "getDetectorInfo");
        assert_eq!(method_name("stop"), "stop");
        assert_eq!(method_name("getDeviceId"), "getDeviceId");
        assert_eq!(method_name("_private_name"), "privateName");
    }

    #[test]
    fn test_encode_request() {
        let bytes = encode_request("setWavelengths", &[json!([254, 280])]).unwrap();
        assert_eq!(bytes, b"[\"setWavelengths\",[254,280]]\n");

        let bytes = encode_request(GET_DEVICE_ID, &[]).unwrap();
        assert_eq!(bytes, b"[\"getDeviceId\"]\n");
    }

    #[test]
    fn test_decode_result() {
        let value = decode_response(
            GET_DEVICE_ID,
            r#"{"id":"getDeviceId","result":{"name":"hplc_controller","form_factor":"3x2","serial_number":0}}"#,
        )
        .unwrap();
        let id: DeviceId = serde_json::from_value(value).unwrap();
        assert_eq!(id.name, "hplc_controller");
        assert_eq!(id.form_factor, "3x2");
        assert_eq!(id.serial_number, 0);
    }

    #[test]
    fn test_decode_missing_result_is_null() {
        let value = decode_response("stop", r#"{"id":"stop"}"#).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_decode_error_object() {
        let err = decode_response(
            "getDetectorInfo",
            r#"{"id":"getDetectorInfo","error":{"message":"Server error","data":"detector not responding","code":-32000}}"#,
        )
        .unwrap_err();
        match err {
            HplcError::Device { method, message } => {
                assert_eq!(method, "getDetectorInfo");
                assert!(message.contains("detector not responding"));
                assert!(message.contains("-32000"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_mismatched_id() {
        let err = decode_response("stop", r#"{"id":"getGradientInfo","result":1}"#).unwrap_err();
        assert!(matches!(err, HplcError::Protocol(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_response("stop", "\u{0}\u{1}garbage"),
            Err(HplcError::Protocol(_))
        ));
        assert!(matches!(
            decode_response("stop", "   "),
            Err(HplcError::Protocol(_))
        ));
    }

    #[test]
    fn test_values_match_numeric_widening() {
        assert!(values_match(&json!(5), &json!(5.0)));
        assert!(values_match(&json!([250, 254]), &json!([250.0, 254.0])));
        assert!(!values_match(&json!(5), &json!(6)));
        assert!(!values_match(&json!("linear"), &json!("step")));
        assert!(values_match(&json!({"a": 1}), &json!({"a": 1.0})));
        assert!(!values_match(&json!([1, 2]), &json!([1, 2, 3])));
    }
}
