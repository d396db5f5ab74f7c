//! WebSocket plumbing for the voice service connection
//!
//! Builds the handshake request and runs the send and receive halves of an
//! established connection. The send task owns the sink and forwards control
//! requests plus keepalive pings; the receive task parses server frames and
//! dispatches them through the client, tagged with the connection
//! generation so frames from a replaced connection are dropped.

use super::VoiceClient;
use crate::protocol::{ClientRequest, ServerEvent};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// Ping interval in seconds to keep the WebSocket connection alive
const PING_INTERVAL_SECS: u64 = 30;

/// Build the WebSocket URL from the configured endpoint
pub(super) fn build_ws_url(endpoint_url: &str) -> String {
    let endpoint = endpoint_url.trim_end_matches('/');
    endpoint
        .replace("https://", "wss://")
        .replace("http://", "ws://")
}

/// Build the WebSocket upgrade request
pub(super) fn build_ws_request(ws_url: &str, host: &str) -> Result<http::Request<()>, String> {
    http::Request::builder()
        .uri(ws_url)
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| e.to_string())
}

/// Generate a random WebSocket key
fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Spawn the send task that forwards control requests to the backend
///
/// Exits when the request channel closes (the connection handle was
/// dropped) or the sink rejects a write; the sink is closed on the way out.
pub(super) fn spawn_send_task<S>(
    mut ws_sink: S,
    mut request_rx: mpsc::Receiver<ClientRequest>,
) -> tokio::task::JoinHandle<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if ws_sink.send(Message::Ping(vec![])).await.is_err() {
                        warn!("Failed to send keepalive ping");
                        break;
                    }
                    trace!("Sent keepalive ping");
                }
                request = request_rx.recv() => {
                    match request {
                        Some(request) => {
                            let json = match serde_json::to_string(&request) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!("Failed to encode control request: {}", e);
                                    continue;
                                }
                            };
                            debug!("Sending control request: {}", json);
                            if ws_sink.send(Message::Text(json)).await.is_err() {
                                warn!("Failed to send control request");
                                break;
                            }
                        }
                        None => {
                            debug!("Request channel closed, closing sink");
                            break;
                        }
                    }
                }
            }
        }
        let _ = ws_sink.close().await;
        info!("Send task exited");
    })
}

/// Spawn the receive task that dispatches server frames
///
/// Every frame is dispatched through the client with this connection's
/// generation; once a newer connection exists the dispatch is refused and
/// the task exits without side effects. Transport loss on the current
/// generation is reported as a disconnect.
pub(super) fn spawn_receive_task(
    mut ws_stream: impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
    client: VoiceClient,
    generation: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg_result) = ws_stream.next().await {
            if !client.is_current(generation) {
                debug!(generation, "Receive task superseded, exiting");
                return;
            }

            match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Server frame: {}", text);
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            client.dispatch_from_transport(generation, event);
                        }
                        Err(e) => {
                            warn!("Failed to parse server frame: {} - {}", e, text);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket closed by server");
                    client.transport_lost(generation);
                    return;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("WebSocket keepalive frame");
                }
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    client.transport_lost(generation);
                    return;
                }
                _ => {}
            }
        }
        // Stream ended without a close frame; same recovery path.
        client.transport_lost(generation);
    })
}
