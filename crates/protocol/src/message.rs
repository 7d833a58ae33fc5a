// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Control frame types.

use serde::{Deserialize, Serialize};

/// Client-to-server control frames.
///
/// # Verbs
/// - `START`: create a stream and bind this connection as its writer
/// - `STOP`: finalize the bound stream (exact size on disk, `READY`)
/// - `GET`: random-access read of any stream, bound or not
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// Create a stream and start uploading to it
    Start {
        /// Caller-chosen stream identifier, opaque to the server
        stream_id: String,
    },
    /// Finish the upload and finalize the stream
    Stop {
        /// The stream to finalize
        stream_id: String,
    },
    /// Read `length` bytes starting at `offset`
    Get {
        /// The stream to read from
        stream_id: String,
        /// Byte position to start reading at
        offset: u64,
        /// Number of bytes requested; must be positive
        length: u64,
    },
}

impl ControlMessage {
    /// The stream id this frame refers to.
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Start { stream_id } | Self::Stop { stream_id } | Self::Get { stream_id, .. } => {
                stream_id
            },
        }
    }
}

/// Server-to-client control frames.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The stream was created and the connection is bound to it
    Started { stream_id: String, message: String },
    /// The stream was finalized
    Stopped { stream_id: String, message: String },
    /// The request failed, or a `GET` ran past the end of the stream
    Error { message: String },
}

impl ServerMessage {
    pub fn started(stream_id: impl Into<String>) -> Self {
        Self::Started {
            stream_id: stream_id.into(),
            message: "Stream started successfully".to_string(),
        }
    }

    pub fn stopped(stream_id: impl Into<String>) -> Self {
        Self::Stopped {
            stream_id: stream_id.into(),
            message: "Stream finalized successfully".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"ERROR","message":"Internal serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn started_frame_matches_wire_format() {
        let frame: Value = serde_json::from_str(&ServerMessage::started("s1").to_json()).unwrap();
        assert_eq!(
            frame,
            json!({"type":"STARTED","streamId":"s1","message":"Stream started successfully"})
        );
    }

    #[test]
    fn stopped_frame_matches_wire_format() {
        let frame: Value = serde_json::from_str(&ServerMessage::stopped("s1").to_json()).unwrap();
        assert_eq!(
            frame,
            json!({"type":"STOPPED","streamId":"s1","message":"Stream finalized successfully"})
        );
    }

    #[test]
    fn error_frame_matches_wire_format() {
        let frame: Value =
            serde_json::from_str(&ServerMessage::error("No data available").to_json()).unwrap();
        assert_eq!(frame, json!({"type":"ERROR","message":"No data available"}));
    }

    #[test]
    fn control_frames_serialize_camel_case() {
        let get = ControlMessage::Get { stream_id: "s1".to_string(), offset: 5, length: 10 };
        let frame: Value = serde_json::to_value(&get).unwrap();
        assert_eq!(frame, json!({"type":"GET","streamId":"s1","offset":5,"length":10}));
    }
}
