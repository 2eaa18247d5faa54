//! Frames exchanged on the live metrics channel.
//!
//! Inbound frames are JSON objects discriminated by `event_type`. Known tags
//! decode into dedicated variants; any other tag is kept whole in
//! [`InboundMessage::Other`] so newer servers keep working.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::ServerIdentity;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping { timestamp: String },
    RequestUpdate { timestamp: String },
}

impl OutboundMessage {
    pub fn ping() -> Self {
        OutboundMessage::Ping { timestamp: now() }
    }

    pub fn request_update() -> Self {
        OutboundMessage::RequestUpdate { timestamp: now() }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// What a `metrics_update` frame refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateScope {
    /// A complete overview document.
    Overview,
    /// One server's document, to be merged into what is already known.
    Server(ServerIdentity),
    /// Anything else the server may send (`error`, future scopes).
    Other(String),
}

impl UpdateScope {
    pub fn parse(server_type: &str) -> Self {
        if server_type == "overview" {
            return UpdateScope::Overview;
        }
        match server_type.parse::<ServerIdentity>() {
            Ok(id) => UpdateScope::Server(id),
            Err(_) => UpdateScope::Other(server_type.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsUpdate {
    pub scope: UpdateScope,
    pub data: Value,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    MetricsUpdate(MetricsUpdate),
    ConnectionEstablished {
        message: Option<String>,
        timestamp: Option<String>,
    },
    /// `heartbeat` and `pong` frames.
    Heartbeat(Value),
    Error {
        message: Option<String>,
        payload: Value,
    },
    Other {
        event_type: String,
        payload: Value,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `event_type`")]
    MissingEventType,
    #[error("`metrics_update` frame has no string `server_type`")]
    MissingServerType,
}

pub fn decode(text: &str) -> Result<InboundMessage, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(obj) = &value else {
        return Err(DecodeError::NotAnObject);
    };
    let event_type = obj
        .get("event_type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingEventType)?
        .to_string();
    let timestamp = obj.get("timestamp").and_then(label);

    let message = match event_type.as_str() {
        "metrics_update" => {
            let server_type = obj
                .get("server_type")
                .and_then(Value::as_str)
                .ok_or(DecodeError::MissingServerType)?;
            InboundMessage::MetricsUpdate(MetricsUpdate {
                scope: UpdateScope::parse(server_type),
                data: obj.get("data").cloned().unwrap_or(Value::Null),
                timestamp,
            })
        }
        "connection_established" => InboundMessage::ConnectionEstablished {
            message: obj.get("message").and_then(Value::as_str).map(str::to_string),
            timestamp,
        },
        "heartbeat" | "pong" => InboundMessage::Heartbeat(value),
        "error" => InboundMessage::Error {
            message: error_message(obj),
            payload: value,
        },
        _ => InboundMessage::Other {
            event_type,
            payload: value,
        },
    };
    Ok(message)
}

// Timestamps arrive as ISO strings or as bare counters.
fn label(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn error_message(obj: &Map<String, Value>) -> Option<String> {
    let data = obj.get("data");
    obj.get("message")
        .or_else(|| data.and_then(|d| d.get("message")))
        .or_else(|| data.and_then(|d| d.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
