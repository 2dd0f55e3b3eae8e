//! WebSocket transport
//!
//! Owns the socket on a background task: writes queued frames, forwards text
//! frames to the connector, and reconnects with exponential backoff when the
//! connection drops.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::{SessionEvent, Transport, WebSocketClient};
use crate::config::Config;
use crate::error::{ConnectorError, Result};
use crate::metrics::WS_RECONNECTS;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Silence after which a keepalive ping is sent
const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub reconnect_delay_ms: u64,
    /// 0 = retry forever
    pub max_reconnect_attempts: u32,
}

impl From<&Config> for TransportConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            reconnect_delay_ms: config.reconnect_delay_ms,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Socket transport backed by tokio-tungstenite
pub struct WebSocketTransport {
    config: TransportConfig,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    /// Whether the connection task is alive
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Transport for WebSocketTransport {
    fn start(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| ConnectorError::NoRuntime(e.to_string()))?;
        let outbound = match self.outbound_rx.lock().take() {
            Some(rx) => rx,
            None => return Ok(()),
        };

        let handle = runtime.spawn(run_session(self.config.clone(), outbound, events));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    fn send(&self, frame: String) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| ConnectorError::SendFailed("connection task stopped".to_string()))
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Why a connected session ended without an error
enum SessionEnd {
    /// Nobody is listening any more, or no one can send
    Shutdown,
}

/// Connect, pump frames, reconnect; runs until shut down or out of attempts
async fn run_session(
    config: TransportConfig,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    info!(endpoint = %config.endpoint, "Starting WebSocket session");

    let mut client = WebSocketClient::new(&config.endpoint);
    let mut reconnect_attempts: u32 = 0;
    let mut connected_before = false;

    loop {
        match client.connect().await {
            Ok(()) => {
                if connected_before {
                    WS_RECONNECTS.inc();
                    info!("WebSocket session re-established");
                    if events.send(SessionEvent::Reconnected).is_err() {
                        break;
                    }
                }
                connected_before = true;
                reconnect_attempts = 0;

                match pump(&mut client, &mut outbound, &events).await {
                    Ok(SessionEnd::Shutdown) => break,
                    Err(e) => error!(error = %e, "WebSocket session failed"),
                }
            }
            Err(e) => error!(error = %e, "WebSocket connect failed"),
        }

        reconnect_attempts += 1;
        if config.max_reconnect_attempts > 0 && reconnect_attempts > config.max_reconnect_attempts {
            error!(attempts = reconnect_attempts, "Max reconnection attempts exceeded");
            break;
        }

        let delay = backoff_delay(config.reconnect_delay_ms, reconnect_attempts);
        warn!(
            attempt = reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after error..."
        );
        sleep(delay).await;
    }

    if client.is_connected() {
        client.close().await;
    }
    info!("WebSocket session stopped");
}

/// Move frames in both directions until the socket fails or the connector goes away
async fn pump(
    client: &mut WebSocketClient,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<SessionEnd> {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => client.send_text(frame).await?,
                None => return Ok(SessionEnd::Shutdown),
            },
            incoming = timeout(RECV_TIMEOUT, client.recv()) => match incoming {
                Ok(Ok(Some(text))) => {
                    if events.send(SessionEvent::Message(text)).is_err() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!("No message received within timeout, sending keepalive");
                    client.ping().await?;
                }
            },
        }
    }
}

/// Exponential backoff capped at [`MAX_BACKOFF_MS`]
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}
