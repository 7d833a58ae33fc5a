// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use axum::extract::ws::{Message, WebSocket};
use opentelemetry::{global, KeyValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use streamvault_protocol::ServerMessage;

use crate::session::{Outbound, Session};
use crate::state::AppState;

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Metrics for WebSocket connection handling
#[derive(Clone)]
struct WebSocketMetrics {
    connections_gauge: opentelemetry::metrics::Gauge<u64>,
    messages_counter: opentelemetry::metrics::Counter<u64>,
    bytes_counter: opentelemetry::metrics::Counter<u64>,
    errors_counter: opentelemetry::metrics::Counter<u64>,
}

impl WebSocketMetrics {
    fn shared() -> Self {
        static METRICS: OnceLock<WebSocketMetrics> = OnceLock::new();
        METRICS
            .get_or_init(|| {
                let meter = global::meter("svault_websocket");
                Self {
                    connections_gauge: meter
                        .u64_gauge("websocket.connections.active")
                        .with_description("Number of active WebSocket connections")
                        .build(),
                    messages_counter: meter
                        .u64_counter("websocket.messages")
                        .with_description("Total WebSocket control messages")
                        .build(),
                    bytes_counter: meter
                        .u64_counter("websocket.payload.bytes")
                        .with_description("Binary payload bytes transferred")
                        .build(),
                    errors_counter: meter
                        .u64_counter("websocket.errors")
                        .with_description("WebSocket errors")
                        .build(),
                }
            })
            .clone()
    }
}

/// Send one outbound frame, with consistent error handling. Returns `Err`
/// when the connection should be closed.
async fn send_outbound(
    socket: &mut WebSocket,
    outbound: Outbound,
    metrics: &WebSocketMetrics,
) -> Result<(), ()> {
    match outbound {
        Outbound::Control(message) => {
            metrics.messages_counter.add(1, &[KeyValue::new("direction", "outbound")]);
            if socket.send(Message::Text(message.to_json().into())).await.is_err() {
                warn!("Failed to send WebSocket control frame");
                return Err(());
            }
        },
        Outbound::Payload(bytes) => {
            metrics
                .bytes_counter
                .add(bytes.len() as u64, &[KeyValue::new("direction", "outbound")]);
            if socket.send(Message::Binary(bytes.into())).await.is_err() {
                warn!("Failed to send WebSocket payload frame");
                return Err(());
            }
        },
    }
    Ok(())
}

async fn reject_oversized_frame(
    socket: &mut WebSocket,
    frame_len: usize,
    max_len: usize,
    metrics: &WebSocketMetrics,
) {
    warn!(frame_len, max_len, "Rejected WebSocket frame: too large");
    metrics.errors_counter.add(1, &[KeyValue::new("error_type", "frame_too_large")]);
    let reply = ServerMessage::error(format!("WebSocket frame too large (max {max_len} bytes)"));
    let _ = send_outbound(socket, Outbound::Control(reply), metrics).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Main WebSocket connection handler.
pub async fn handle_websocket(mut socket: WebSocket, app_state: Arc<AppState>) {
    info!("WebSocket connection established");

    let metrics = WebSocketMetrics::shared();
    let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    metrics.connections_gauge.record(active, &[]);

    let max_frame_bytes = app_state.config.server.max_frame_bytes;
    let mut session = Session::new(&app_state);

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => {
                if text.len() > max_frame_bytes {
                    reject_oversized_frame(&mut socket, text.len(), max_frame_bytes, &metrics)
                        .await;
                    break;
                }
                metrics.messages_counter.add(1, &[KeyValue::new("direction", "inbound")]);
                let outbound = session.handle_text(text.as_str()).await;
                if send_outbound(&mut socket, outbound, &metrics).await.is_err() {
                    metrics.errors_counter.add(1, &[KeyValue::new("error_type", "send_error")]);
                    break;
                }
            },
            Ok(Message::Binary(data)) => {
                if data.len() > max_frame_bytes {
                    reject_oversized_frame(&mut socket, data.len(), max_frame_bytes, &metrics)
                        .await;
                    break;
                }
                metrics
                    .bytes_counter
                    .add(data.len() as u64, &[KeyValue::new("direction", "inbound")]);
                if let Some(outbound) = session.handle_binary(data).await {
                    metrics.errors_counter.add(1, &[KeyValue::new("error_type", "write_error")]);
                    if send_outbound(&mut socket, outbound, &metrics).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed");
                break;
            },
            Err(e) => {
                error!(error = %e, "WebSocket error");
                metrics.errors_counter.add(1, &[KeyValue::new("error_type", "connection_error")]);
                break;
            },
            // Ping/Pong are handled by the WebSocket layer.
            _ => {},
        }
    }

    session.on_disconnect();

    let prev = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    metrics.connections_gauge.record(prev.saturating_sub(1), &[]);
    info!("WebSocket connection terminated");
}
