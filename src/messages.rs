//! Messages exchanged between a caller and the relay.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SEND_EVENT: &str = "SEND_EVENT";
pub const EVENT_SENT: &str = "EVENT_SENT";
pub const EVENT_ERROR: &str = "EVENT_ERROR";

/// A `SEND_EVENT` command. The payload is forwarded as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSendRequest {
    pub data: Value,
}

impl EventSendRequest {
    pub fn new<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::to_value(data)?,
        })
    }

    /// Extracts the request from a raw inbound message.
    ///
    /// Returns `None` for anything not tagged `SEND_EVENT`, including
    /// messages that are not JSON objects at all. A missing `data` field is
    /// read as `null`.
    pub fn from_message(message: &Value) -> Option<Self> {
        if message.get("type").and_then(Value::as_str) != Some(SEND_EVENT) {
            return None;
        }
        Some(Self {
            data: message.get("data").cloned().unwrap_or(Value::Null),
        })
    }

    pub fn to_message(&self) -> Value {
        json!({
            "type": SEND_EVENT,
            "data": self.data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum EventSendResult {
    #[serde(rename = "EVENT_SENT")]
    Sent { data: Value },
    #[serde(rename = "EVENT_ERROR")]
    Error { error: String },
}

impl EventSendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, EventSendResult::Sent { .. })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            EventSendResult::Sent { .. } => EVENT_SENT,
            EventSendResult::Error { .. } => EVENT_ERROR,
        }
    }

    pub fn to_message(&self) -> Value {
        match self {
            EventSendResult::Sent { data } => json!({ "type": EVENT_SENT, "data": data }),
            EventSendResult::Error { error } => json!({ "type": EVENT_ERROR, "error": error }),
        }
    }
}
