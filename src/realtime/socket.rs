//! Realtime WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::protocol::{self, Frame};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct RealtimeSocket {
    stream: WsStream,
}

impl RealtimeSocket {
    /// Connect to the realtime endpoint. The API key travels in the URL;
    /// the user's token is sent with each channel join.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting realtime socket");
        tracing::debug!("Realtime URL: {}", url);

        let (stream, response) = connect_async(url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame).context("Failed to encode frame")?;
        tracing::debug!("WS send: {}", text);
        self.stream
            .send(WsMessage::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next frame, answering pings on the way.
    ///
    /// Returns `Ok(None)` once the server closes the socket. Text that is
    /// not a valid frame is logged and skipped.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match protocol::parse(&text) {
                        Ok(frame) => return Ok(Some(frame)),
                        Err(e) => tracing::warn!("Skipping frame: {:#}", e),
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    self.stream
                        .send(WsMessage::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}
