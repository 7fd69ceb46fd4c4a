use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON frame carried over the socket (§4.3, §6). Every request the
/// client sends carries a `reqId` it uses to match the eventual response;
/// server pushes (`dirty`, `presence`) have no `reqId` and are never
/// responded to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WireMessage {
    Handshake { token: String, device_id: String },
    Request {
        req_id: String,
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Response {
        req_id: String,
        #[serde(flatten)]
        result: WireResult,
    },
    Push { event: String, payload: Value },
}

/// The `{data}` / `{error}` shape every response carries (§6). Untagged so
/// the wire form stays exactly `{"data": ...}` or `{"error": {...}}` with no
/// extra discriminant field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResult {
    Ok { data: Value },
    Err { error: WireError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl WireResult {
    pub fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    pub fn err(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Err {
            error: WireError {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

impl WireMessage {
    pub fn response(req_id: String, result: WireResult) -> Self {
        Self::Response { req_id, result }
    }

    pub fn push(event: impl Into<String>, payload: Value) -> Self {
        Self::Push {
            event: event.into(),
            payload,
        }
    }
}
