//! WebSocket channel to the voice-agent backend
//!
//! Manages the persistent connection for one client process.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket (with retries), spawn reader task
//! 2. `send()` - Fire-and-forget client events (audio chunks, call control)
//! 3. `take_incoming()` - Receiver for parsed server events
//! 4. `disconnect()` - Clean shutdown
//!
//! A dropped or failed read side closes the incoming channel; the client loop
//! observes `recv() == None` and treats it as a disconnect.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientEvent, ServerEvent};
use super::TransportError;

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retry attempts for the initial connection
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Depth of the incoming event queue (~10s of audio at 100ms chunks)
const INCOMING_QUEUE_DEPTH: usize = 100;

/// Handle to the live channel
///
/// Owns the WebSocket write half; the read half lives on a background task
/// that parses frames into [`ServerEvent`]s.
pub struct AgentChannel {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Wrapped in Option so it can be taken for concurrent processing
    incoming_rx: Option<mpsc::Receiver<ServerEvent>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl AgentChannel {
    /// Connect to the backend, retrying with exponential backoff
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                log::info!(
                    "Retrying channel connection in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
            }

            match Self::try_connect(url).await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    log::warn!("Connection attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransportError::ConnectionFailed("Max retries exceeded".to_string())))
    }

    /// Single connection attempt (no retries)
    async fn try_connect(url: &str) -> Result<Self, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        log::info!("Connecting to voice agent backend at {}...", url);

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(
                request, None, false, // disable_nagle (we want low latency)
            ),
        )
        .await
        .map_err(|_| TransportError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        log::info!("Channel connected");

        let (write, mut read) = ws_stream.split();

        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE_DEPTH);

        // Background task: parse incoming frames and forward them.
        let reader_task = tokio::spawn(async move {
            while let Some(frame_result) = read.next().await {
                match frame_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if incoming_tx.send(event).await.is_err() {
                                log::debug!("Incoming channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse server event: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("Channel closed by server");
                        break;
                    }
                    Err(e) => {
                        log::warn!("Channel read error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            log::debug!("Channel reader task exiting");
            // incoming_tx drops here; the client loop sees a closed channel.
        });

        Ok(Self {
            write,
            incoming_rx: Some(incoming_rx),
            reader_task,
        })
    }

    /// Send a client event over the channel
    ///
    /// Designed to be fast - it serializes and queues the frame. Callers on
    /// the audio path treat failures as dropped chunks, not fatal errors.
    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        let json = serde_json::to_string(event)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(())
    }

    /// Take ownership of the incoming event receiver
    ///
    /// Allows the client loop to consume server events while the channel
    /// handle is used for sending. Returns `None` if already taken.
    pub fn take_incoming(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.incoming_rx.take()
    }

    /// Gracefully close the channel
    pub async fn disconnect(mut self) {
        log::info!("Disconnecting from backend...");

        self.reader_task.abort();

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing channel: {}", e);
        }
    }
}

impl Drop for AgentChannel {
    fn drop(&mut self) {
        // Ensure the reader task dies if the channel is dropped without
        // disconnect().
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listens on this port; connect should exhaust retries and
        // return ConnectionFailed rather than hang or panic.
        let result = AgentChannel::try_connect("ws://127.0.0.1:9/stream").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    #[ignore] // Requires a running backend
    async fn test_connect_and_disconnect() {
        let channel = AgentChannel::connect(super::super::DEFAULT_SERVER_URL).await;
        assert!(channel.is_ok(), "Connection failed: {:?}", channel.err());

        let mut channel = channel.unwrap();
        assert!(channel.take_incoming().is_some());
        assert!(channel.take_incoming().is_none());

        channel.disconnect().await;
    }
}
