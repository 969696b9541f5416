//! Wire protocol types for the Home Assistant WebSocket API
//!
//! One JSON object per text frame. The server tags every message with a
//! `type` field; commands from the client carry a correlation `id` assigned
//! by the command tracker, except for the `auth` frame which is sent before
//! any id exists.

use crate::error::{HassError, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// A command to be sent to the server
#[derive(Debug, Clone)]
pub struct HassRequest {
    /// Command type, e.g. "get_states", "call_service", "subscribe_events"
    pub kind: String,

    /// Additional payload fields merged into the outgoing frame
    pub payload: Map<String, Value>,

    /// Whether this request may be replayed after a reconnect
    pub should_retry: bool,
}

impl HassRequest {
    /// Create a request with an empty payload
    pub fn new<S: Into<String>>(kind: S) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
            should_retry: false,
        }
    }

    /// Mark the request as safe to replay after a reconnect
    pub fn retryable(mut self) -> Self {
        self.should_retry = true;
        self
    }

    /// Add a payload field
    pub fn with_field<S: Into<String>, V: Into<Value>>(mut self, key: S, value: V) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the payload wholesale
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize the request into a wire frame under the given identifier
    pub fn to_frame(&self, id: u64) -> Result<String> {
        let mut object = self.payload.clone();
        object.insert("id".to_string(), Value::from(id));
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        Ok(serde_json::to_string(&Value::Object(object))?)
    }
}

/// Build the raw authentication frame sent in response to `auth_required`
pub fn auth_frame(access_token: &str) -> Result<String> {
    Ok(serde_json::to_string(&json!({
        "type": "auth",
        "access_token": access_token,
    }))?)
}

/// Inbound message, classified by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Server demands authentication before anything else
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credentials accepted; commands may flow
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// Credentials rejected
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Pushed event for a subscription
    Event { id: u64, event: Value },
    /// Reply to a command
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CommandError>,
    },
}

/// Server-reported command failure details
#[derive(Debug, Clone, Deserialize)]
pub struct CommandError {
    /// Error code; the server sends strings but older versions used numbers
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CommandError {
    /// Convert into the client error taxonomy
    pub fn into_error(self) -> HassError {
        let code = match self.code {
            Some(Value::String(code)) => code,
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        };
        let message = self
            .message
            .unwrap_or_else(|| "command failed".to_string());
        HassError::External { code, message }
    }
}
