// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-connection session state machine.
//!
//! One `Session` per WebSocket connection. The session owns its binding
//! state (idle, or uploading to exactly one stream); every inbound frame is
//! a method call that returns the frame to send back, so all protocol
//! decisions live here and the socket loop stays mechanical.
//!
//! File work (appends, reads, creates) runs under `spawn_blocking` so a slow
//! disk never stalls the connection's reactor thread.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use streamvault_core::{BufferPool, CacheError, StreamRegistry};
use streamvault_protocol::{parse_control, ControlMessage, ServerMessage};

use crate::state::AppState;

/// A frame the session wants sent back on the socket.
#[derive(Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON control frame
    Control(ServerMessage),
    /// Raw binary GET response
    Payload(Vec<u8>),
}

enum Binding {
    Idle,
    Uploading { stream_id: String },
}

/// Connection-scoped protocol state.
pub struct Session {
    registry: Arc<StreamRegistry>,
    pool: Arc<BufferPool>,
    binding: Binding,
}

impl Session {
    pub fn new(app_state: &AppState) -> Self {
        Self {
            registry: Arc::clone(&app_state.registry),
            pool: Arc::clone(&app_state.pool),
            binding: Binding::Idle,
        }
    }

    /// The stream this connection is currently uploading to, if any.
    pub fn bound_stream(&self) -> Option<&str> {
        match &self.binding {
            Binding::Idle => None,
            Binding::Uploading { stream_id } => Some(stream_id),
        }
    }

    /// Handle one inbound text frame. Every control verb gets a reply.
    pub async fn handle_text(&mut self, text: &str) -> Outbound {
        match parse_control(text) {
            Ok(ControlMessage::Start { stream_id }) => self.handle_start(stream_id).await,
            Ok(ControlMessage::Stop { stream_id }) => self.handle_stop(stream_id).await,
            Ok(ControlMessage::Get { stream_id, offset, length }) => {
                self.handle_get(stream_id, offset, length).await
            },
            Err(e) => {
                warn!(error = %e, frame_len = text.len(), "rejected control frame");
                Outbound::Control(ServerMessage::error(e.to_string()))
            },
        }
    }

    /// Handle one inbound binary frame.
    ///
    /// Returns `None` on success, and also `None` when the connection has no
    /// active upload: such frames are logged and silently dropped.
    pub async fn handle_binary(&mut self, payload: Bytes) -> Option<Outbound> {
        let Binding::Uploading { stream_id } = &self.binding else {
            debug!(payload_len = payload.len(), "binary frame with no active upload; dropped");
            return None;
        };
        let stream_id = stream_id.clone();

        let registry = Arc::clone(&self.registry);
        let pool = Arc::clone(&self.pool);
        let id = stream_id.clone();
        let written = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            // Stage the payload through pooled buffers so appends of any
            // frame size reuse the same scratch space.
            for chunk in payload.chunks(pool.buffer_size()) {
                let mut buf = pool.acquire();
                buf[..chunk.len()].copy_from_slice(chunk);
                let result = registry.write_chunk(&id, &buf[..chunk.len()]);
                pool.release(buf);
                written += result?;
            }
            Ok::<usize, CacheError>(written)
        })
        .await;

        match written {
            Ok(Ok(written)) => {
                debug!(stream_id = %stream_id, written, "chunk appended");
                None
            },
            Ok(Err(e)) => {
                warn!(stream_id = %stream_id, error = %e, "failed to write chunk");
                if matches!(e, CacheError::StreamMissing(_)) {
                    // The stream vanished underneath us (GC or explicit
                    // delete); the binding is stale.
                    self.binding = Binding::Idle;
                }
                Some(Outbound::Control(ServerMessage::error(format!(
                    "Failed to write to stream: {stream_id}"
                ))))
            },
            Err(e) => {
                error!(stream_id = %stream_id, error = %e, "write task failed");
                Some(Outbound::Control(ServerMessage::error(format!(
                    "Failed to write to stream: {stream_id}"
                ))))
            },
        }
    }

    /// Connection closed: drop the binding. The stream stays `UPLOADING`
    /// and is left for the GC sweep; it is neither finalized nor deleted.
    pub fn on_disconnect(&mut self) {
        if let Binding::Uploading { stream_id } = &self.binding {
            info!(stream_id = %stream_id, "connection closed mid-upload; stream left for GC sweep");
        }
        self.binding = Binding::Idle;
    }

    async fn handle_start(&mut self, stream_id: String) -> Outbound {
        if let Binding::Uploading { stream_id: bound } = &self.binding {
            warn!(stream_id = %stream_id, bound = %bound, "START while already uploading");
            return Outbound::Control(ServerMessage::error(format!(
                "Failed to create stream: {stream_id}"
            )));
        }

        let registry = Arc::clone(&self.registry);
        let id = stream_id.clone();
        let created = tokio::task::spawn_blocking(move || registry.create_stream(&id).map(|_| ()))
            .await;

        match created {
            Ok(Ok(())) => {
                info!(stream_id = %stream_id, "upload started");
                self.binding = Binding::Uploading { stream_id: stream_id.clone() };
                Outbound::Control(ServerMessage::started(stream_id))
            },
            Ok(Err(e)) => {
                warn!(stream_id = %stream_id, error = %e, "failed to create stream");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to create stream: {stream_id}"
                )))
            },
            Err(e) => {
                error!(stream_id = %stream_id, error = %e, "create task failed");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to create stream: {stream_id}"
                )))
            },
        }
    }

    async fn handle_stop(&mut self, stream_id: String) -> Outbound {
        let bound = matches!(&self.binding, Binding::Uploading { stream_id: bound } if *bound == stream_id);
        if !bound {
            warn!(stream_id = %stream_id, "STOP for a stream this connection is not uploading");
            return Outbound::Control(ServerMessage::error(format!(
                "Failed to stop stream: {stream_id}"
            )));
        }

        // Whatever finalize decides, this connection's upload is over.
        self.binding = Binding::Idle;

        let registry = Arc::clone(&self.registry);
        let id = stream_id.clone();
        let finalized =
            tokio::task::spawn_blocking(move || registry.finalize_stream(&id)).await;

        match finalized {
            Ok(Ok(())) => {
                info!(stream_id = %stream_id, "stream finalized");
                Outbound::Control(ServerMessage::stopped(stream_id))
            },
            Ok(Err(e)) => {
                warn!(stream_id = %stream_id, error = %e, "failed to finalize stream");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to stop stream: {stream_id}"
                )))
            },
            Err(e) => {
                error!(stream_id = %stream_id, error = %e, "finalize task failed");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to stop stream: {stream_id}"
                )))
            },
        }
    }

    async fn handle_get(&self, stream_id: String, offset: u64, length: u64) -> Outbound {
        let Some(context) = self.registry.get_stream(&stream_id) else {
            debug!(stream_id = %stream_id, "GET for unknown stream");
            return Outbound::Control(ServerMessage::error(format!(
                "Failed to read from stream: {stream_id}"
            )));
        };

        let reader = Arc::clone(&context);
        let read = tokio::task::spawn_blocking(move || reader.read(offset, length)).await;

        match read {
            Ok(Ok(bytes)) if !bytes.is_empty() => Outbound::Payload(bytes),
            Ok(Ok(_)) => {
                if offset >= context.total_size() {
                    // End-of-stream indicator, not a failure: the client
                    // uses it to stop requesting.
                    Outbound::Control(ServerMessage::error("No data available"))
                } else {
                    Outbound::Control(ServerMessage::error(format!(
                        "Failed to read from stream: {stream_id}"
                    )))
                }
            },
            Ok(Err(e)) => {
                warn!(stream_id = %stream_id, error = %e, "failed to read from stream");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to read from stream: {stream_id}"
                )))
            },
            Err(e) => {
                error!(stream_id = %stream_id, error = %e, "read task failed");
                Outbound::Control(ServerMessage::error(format!(
                    "Failed to read from stream: {stream_id}"
                )))
            },
        }
    }
}
