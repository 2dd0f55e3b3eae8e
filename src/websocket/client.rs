//! Single Bitfinex socket connection
//!
//! Thin wrapper over a tungstenite stream. Reconnecting is left to the
//! transport; once the stream fails it is dropped and `recv` reports an error.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{ConnectorError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What one read from the socket produced
#[derive(Debug)]
enum Inbound {
    Text(String),
    Ping(Vec<u8>),
    Ignored,
    Closed(String),
}

impl From<Option<std::result::Result<Message, tungstenite::Error>>> for Inbound {
    fn from(read: Option<std::result::Result<Message, tungstenite::Error>>) -> Self {
        match read {
            Some(Ok(Message::Text(text))) => Inbound::Text(text),
            // The venue only sends JSON text; tolerate binary framing anyway
            Some(Ok(Message::Binary(data))) => {
                Inbound::Text(String::from_utf8_lossy(&data).into_owned())
            }
            Some(Ok(Message::Ping(data))) => Inbound::Ping(data),
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => Inbound::Ignored,
            Some(Ok(Message::Close(frame))) => Inbound::Closed(format!("closed by peer: {:?}", frame)),
            Some(Err(e)) => Inbound::Closed(e.to_string()),
            None => Inbound::Closed("stream ended".to_string()),
        }
    }
}

pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
}

impl WebSocketClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to Bitfinex WebSocket");

        let (stream, response) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| ConnectorError::WebSocket(format!("connect to {}: {}", self.endpoint, e)))?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Next text frame. `Ok(None)` after a control frame was handled.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self.stream.as_mut().ok_or(ConnectorError::SessionNotStarted)?;

        match Inbound::from(stream.next().await) {
            Inbound::Text(text) => {
                debug!(len = text.len(), "Frame received");
                Ok(Some(text))
            }
            Inbound::Ping(payload) => {
                if let Err(e) = stream.send(Message::Pong(payload)).await {
                    warn!(error = %e, "Failed to answer ping");
                }
                Ok(None)
            }
            Inbound::Ignored => Ok(None),
            Inbound::Closed(reason) => {
                error!(reason = %reason, "WebSocket connection lost");
                self.stream = None;
                Err(ConnectorError::WebSocket(reason))
            }
        }
    }

    pub async fn send_text(&mut self, frame: String) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ConnectorError::SessionNotStarted)?;

        debug!(frame = %frame, "Sending frame");
        stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| ConnectorError::SendFailed(e.to_string()))
    }

    /// Keepalive ping; a no-op when disconnected
    pub async fn ping(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream
                .send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| ConnectorError::SendFailed(e.to_string())),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }
}
