// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Upload and download drivers for the StreamVault WebSocket protocol.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use streamvault_protocol::{ControlMessage, ServerMessage};

/// Recommended binary frame size; small enough not to fragment the control
/// channel.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Per-request timeout for control replies and GET responses.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Attempts per GET before the download is abandoned.
pub const MAX_RETRIES: usize = 3;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Normalize the server URL to a `ws(s)://` URL, defaulting the path to
/// `/audio` when none is given.
fn stream_ws_url(server_url: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(server_url)?;
    match url.scheme() {
        "ws" | "wss" => {},
        "http" => {
            url.set_scheme("ws")
                .map_err(|()| "Failed to convert http:// to ws:// for server URL")?;
        },
        "https" => {
            url.set_scheme("wss")
                .map_err(|()| "Failed to convert https:// to wss:// for server URL")?;
        },
        _ => return Err("Server URL must be http(s) or ws(s)".into()),
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/audio");
    }
    Ok(url)
}

async fn send_control(ws: &mut WsStream, message: &ControlMessage) -> Result<(), ClientError> {
    let json = serde_json::to_string(message)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Wait for the next control reply, ignoring transport frames.
async fn recv_control(ws: &mut WsStream) -> Result<ServerMessage, ClientError> {
    loop {
        match timeout(REQUEST_TIMEOUT, ws.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(Message::Binary(_))) => {
                return Err("unexpected binary frame while waiting for a control reply".into())
            },
            Some(Ok(_)) => {}, // ping/pong
            Some(Err(e)) => return Err(e.into()),
            None => return Err("WebSocket closed before receiving a reply".into()),
        }
    }
}

/// Upload a file as stream `stream_id`: START, one binary frame per chunk,
/// STOP. Returns the number of bytes sent.
///
/// # Errors
///
/// Returns an error if the connection, the file, or any protocol step fails,
/// including an `ERROR` reply to START or STOP.
pub async fn upload_stream(
    server_url: &str,
    input: &Path,
    stream_id: &str,
    chunk_size: usize,
) -> Result<u64, ClientError> {
    let url = stream_ws_url(server_url)?;
    info!(server = %url, stream_id, "starting upload");
    let (mut ws, _) = connect_async(url.to_string()).await?;

    send_control(&mut ws, &ControlMessage::Start { stream_id: stream_id.to_string() }).await?;
    match recv_control(&mut ws).await? {
        ServerMessage::Started { .. } => {},
        ServerMessage::Error { message } => return Err(message.into()),
        other => return Err(format!("unexpected reply to START: {other:?}").into()),
    }

    let mut file = fs::File::open(input).await?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ws.send(Message::Binary(Bytes::copy_from_slice(&buf[..n]))).await?;
        total += n as u64;
    }

    send_control(&mut ws, &ControlMessage::Stop { stream_id: stream_id.to_string() }).await?;
    match recv_control(&mut ws).await? {
        ServerMessage::Stopped { .. } => {},
        ServerMessage::Error { message } => return Err(message.into()),
        other => return Err(format!("unexpected reply to STOP: {other:?}").into()),
    }

    ws.close(None).await?;
    info!(total_bytes = total, stream_id, "upload complete");
    Ok(total)
}

enum GetReply {
    Data(Vec<u8>),
    EndOfStream,
}

async fn get_chunk(
    ws: &mut WsStream,
    stream_id: &str,
    offset: u64,
    length: u64,
) -> Result<GetReply, ClientError> {
    send_control(
        ws,
        &ControlMessage::Get { stream_id: stream_id.to_string(), offset, length },
    )
    .await?;

    loop {
        match timeout(REQUEST_TIMEOUT, ws.next()).await? {
            Some(Ok(Message::Binary(data))) => return Ok(GetReply::Data(data.to_vec())),
            Some(Ok(Message::Text(text))) => {
                return match serde_json::from_str(text.as_str())? {
                    ServerMessage::Error { message } if message == "No data available" => {
                        Ok(GetReply::EndOfStream)
                    },
                    ServerMessage::Error { message } => Err(message.into()),
                    other => Err(format!("unexpected reply to GET: {other:?}").into()),
                };
            },
            Some(Ok(_)) => {}, // ping/pong
            Some(Err(e)) => return Err(e.into()),
            None => return Err("WebSocket closed before receiving a reply".into()),
        }
    }
}

async fn get_chunk_with_retry(
    ws: &mut WsStream,
    stream_id: &str,
    offset: u64,
    length: u64,
) -> Result<GetReply, ClientError> {
    let mut last_error: Option<ClientError> = None;
    for attempt in 1..=MAX_RETRIES {
        match get_chunk(ws, stream_id, offset, length).await {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                warn!(stream_id, offset, attempt, error = %e, "GET failed");
                last_error = Some(e);
            },
        }
    }
    Err(last_error.unwrap_or_else(|| "GET failed with no recorded error".into()))
}

/// Download stream `stream_id` into `output` with sequential GET requests.
/// Returns the number of bytes written.
///
/// The loop advances by each received frame's length and stops on the
/// server's end-of-stream signal or on a frame shorter than requested.
///
/// # Errors
///
/// Returns an error if the connection, the output file, or a GET fails after
/// [`MAX_RETRIES`] attempts.
pub async fn download_stream(
    server_url: &str,
    stream_id: &str,
    output: &Path,
    chunk_size: usize,
) -> Result<u64, ClientError> {
    let url = stream_ws_url(server_url)?;
    info!(server = %url, stream_id, "starting download");
    let (mut ws, _) = connect_async(url.to_string()).await?;

    let mut file = fs::File::create(output).await?;
    let length = chunk_size.max(1) as u64;
    let mut offset = 0u64;
    loop {
        match get_chunk_with_retry(&mut ws, stream_id, offset, length).await? {
            GetReply::Data(data) => {
                file.write_all(&data).await?;
                offset += data.len() as u64;
                debug!(stream_id, offset, "chunk received");
                if (data.len() as u64) < length {
                    break;
                }
            },
            GetReply::EndOfStream => break,
        }
    }

    file.flush().await?;
    ws.close(None).await?;
    info!(total_bytes = offset, stream_id, "download complete");
    Ok(offset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn http_schemes_convert_to_websocket() {
        assert_eq!(stream_ws_url("http://host:8080/audio").unwrap().as_str(), "ws://host:8080/audio");
        assert_eq!(
            stream_ws_url("https://host/audio").unwrap().as_str(),
            "wss://host/audio"
        );
    }

    #[test]
    fn websocket_schemes_pass_through() {
        assert_eq!(
            stream_ws_url("ws://host:9000/custom").unwrap().as_str(),
            "ws://host:9000/custom"
        );
    }

    #[test]
    fn bare_host_defaults_to_audio_path() {
        assert_eq!(stream_ws_url("ws://host:8080").unwrap().as_str(), "ws://host:8080/audio");
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(stream_ws_url("ftp://host/x").is_err());
    }
}
