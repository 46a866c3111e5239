//! JSON-RPC 2.0 envelopes and inbound call classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only method the relay handles itself.
pub const SUBMIT_METHOD: &str = "eth_sendRawTransaction";

pub const VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl Request {
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: VERSION.into(),
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }

    /// First positional parameter as a string.
    pub fn first_string_param(&self) -> Result<&str, crate::Error> {
        self.params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| crate::Error::InvalidRequest("invalid transaction format".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, err: &crate::Error) -> Self {
        Self {
            jsonrpc: VERSION.into(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: err.rpc_code(),
                message: err.to_string(),
            }),
        }
    }
}

/// What the dispatcher does with an inbound body.
#[derive(Debug)]
pub enum Call {
    /// A single submit call, handled by the relay.
    Submit(Request),
    /// Anything else; forwarded verbatim.
    Passthrough,
}

/// Classify an inbound body. Batches are never handled by the relay:
/// one containing a submit call is rejected, anything else is forwarded.
pub fn classify(body: &[u8]) -> Result<Call, crate::Error> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| crate::Error::Parse(e.to_string()))?;

    if let Value::Array(calls) = &value {
        if calls.iter().any(is_submit) {
            return Err(crate::Error::BatchSubmitUnsupported);
        }
        return Ok(Call::Passthrough);
    }

    if !is_submit(&value) {
        return Ok(Call::Passthrough);
    }
    let call: Request = serde_json::from_value(value)
        .map_err(|e| crate::Error::InvalidRequest(e.to_string()))?;
    Ok(Call::Submit(call))
}

fn is_submit(call: &Value) -> bool {
    call.get("method").and_then(Value::as_str) == Some(SUBMIT_METHOD)
}
