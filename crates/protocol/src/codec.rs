// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stateless parsing of inbound control frames.
//!
//! Parsing is hand-rolled over a [`serde_json::Value`] rather than derived:
//! the error strings are part of the wire contract, and the `type` field
//! matches case-insensitively. Unknown fields are ignored.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::ControlMessage;

/// Parse failure for an inbound control frame.
///
/// The `Display` text of each variant is exactly what goes into the
/// outbound `ERROR` frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The text frame is not a JSON object.
    #[error("Invalid JSON format")]
    InvalidJson,

    /// A required field is absent.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// The `type` field names no known verb.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// A field is present but has the wrong type or an illegal value.
    #[error("Invalid {0}")]
    InvalidField(&'static str),
}

/// Parse one inbound text frame into a [`ControlMessage`].
pub fn parse_control(text: &str) -> Result<ControlMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
    let Value::Object(fields) = value else {
        return Err(ProtocolError::InvalidJson);
    };

    // A non-string `type` reports the same way as an absent one.
    let message_type = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("type"))?;

    match message_type.to_ascii_uppercase().as_str() {
        "START" => Ok(ControlMessage::Start { stream_id: string_field(&fields, "streamId")? }),
        "STOP" => Ok(ControlMessage::Stop { stream_id: string_field(&fields, "streamId")? }),
        "GET" => {
            let stream_id = string_field(&fields, "streamId")?;
            let offset = uint_field(&fields, "offset")?;
            let length = uint_field(&fields, "length")?;
            if length == 0 {
                return Err(ProtocolError::InvalidField("length"));
            }
            Ok(ControlMessage::Get { stream_id, offset, length })
        },
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn string_field(fields: &Map<String, Value>, name: &'static str) -> Result<String, ProtocolError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ProtocolError::InvalidField(name)),
        None => Err(ProtocolError::MissingField(name)),
    }
}

fn uint_field(fields: &Map<String, Value>, name: &'static str) -> Result<u64, ProtocolError> {
    match fields.get(name) {
        Some(value) => value.as_u64().ok_or(ProtocolError::InvalidField(name)),
        None => Err(ProtocolError::MissingField(name)),
    }
}
