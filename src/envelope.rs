//! Decoding of the service's JSON response envelope.
//!
//! Every response body has the shape `{code, message?, error?, data?}`. A `code` of
//! `"0"` or `"0000"` means success and `data` is the payload; any other code is a
//! failure whose reason is taken from `message`, then `error`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use serde_json::value::RawValue;
use std::fmt;

/// Codes the service uses to signal success.
pub const SUCCESS_CODES: [&str; 2] = ["0", "0000"];

/// Why an envelope could not be turned into a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not JSON, not an object, or `code` missing / not a scalar.
    Malformed(String),
    /// Well-formed envelope with a non-success code.
    Remote { code: String, message: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(reason) => write!(f, "malformed envelope: {}", reason),
            DecodeError::Remote { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Deserialize)]
#[serde(untagged)]
enum Code {
    Text(String),
    Number(serde_json::Number),
}

impl Code {
    fn into_string(self) -> String {
        match self {
            Code::Text(s) => s,
            Code::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    code: Option<Code>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    data: Option<Box<RawValue>>,
}

/// Keeps `"data": null` as a present raw value instead of collapsing it to `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// Decodes a response body, returning the raw bytes of `data` on success.
///
/// The payload is the `data` sub-document exactly as it appeared on the wire.
/// A missing `data` field yields an empty payload.
pub fn decode(body: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let code = envelope
        .code
        .ok_or_else(|| DecodeError::Malformed("missing field `code`".to_string()))?
        .into_string();

    if !SUCCESS_CODES.contains(&code.as_str()) {
        let message = non_empty(envelope.message)
            .or_else(|| non_empty(envelope.error))
            .unwrap_or_else(|| format!("non zero response code {}", code));
        return Err(DecodeError::Remote { code, message });
    }

    Ok(envelope
        .data
        .map(|raw| raw.get().as_bytes().to_vec())
        .unwrap_or_default())
}

fn non_empty(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
