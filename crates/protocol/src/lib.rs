// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! protocol: Defines the WebSocket wire contract for StreamVault.
//!
//! Control frames are JSON text frames with a mandatory `type` field;
//! payloads travel as raw binary frames with no headers. The codec is
//! stateless: parsing and emitting never depend on connection state.
//!
//! # Example (upload)
//! ```json
//! {"type":"START","streamId":"s1"}
//! {"type":"STARTED","streamId":"s1","message":"Stream started successfully"}
//! ```
//!
//! # Example (random read)
//! ```json
//! {"type":"GET","streamId":"s1","offset":0,"length":11}
//! ```
//! answered by one binary frame, or by
//! `{"type":"ERROR","message":"No data available"}` once the offset reaches
//! the end of the stream.

pub mod codec;
pub mod message;

pub use codec::{parse_control, ProtocolError};
pub use message::{ControlMessage, ServerMessage};
