//! Connector
//!
//! Public entry point. REST calls go straight to [`RestClient`]; socket
//! subscriptions share one transport session that is started lazily on the
//! first subscribe. Inbound frames are processed by a single task, strictly in
//! arrival order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{ConnectorError, Result};
use crate::parser::Request;
use crate::publisher::{EventPublisher, MarketEvent};
use crate::registry::{SubscriptionRegistry, SubscriptionState};
use crate::rest::{CrossRateMatrix, RestClient};
use crate::timeframe::timeframe_for_period;
use crate::types::{Candle, ChannelKey, Ticker, Trade};
use crate::websocket::{SessionEvent, Transport, TransportConfig, WebSocketTransport};

struct Inner<T> {
    rest: RestClient,
    transport: T,
    registry: Arc<SubscriptionRegistry>,
    publisher: Arc<EventPublisher>,
    dispatcher: Dispatcher,
    /// Subscribe frames for every key the caller still wants, replayed after a reconnect
    requests: Mutex<HashMap<ChannelKey, String>>,
}

/// Bitfinex market data connector
pub struct Connector<T: Transport> {
    inner: Arc<Inner<T>>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl Connector<WebSocketTransport> {
    /// Connector using the live REST and WebSocket endpoints from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RestClient::new(&config.rest_endpoint),
            WebSocketTransport::new(TransportConfig::from(config)),
            config.event_channel_capacity,
        )
    }
}

impl<T: Transport> Connector<T> {
    pub fn new(rest: RestClient, transport: T, event_capacity: usize) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let publisher = Arc::new(EventPublisher::new(event_capacity));
        let dispatcher = Dispatcher::new(registry.clone(), publisher.clone());

        Self {
            inner: Arc::new(Inner {
                rest,
                transport,
                registry,
                publisher,
                dispatcher,
                requests: Mutex::new(HashMap::new()),
            }),
            session: Mutex::new(None),
        }
    }

    pub async fn fetch_recent_trades(&self, pair: &str, max_count: u32) -> Result<Vec<Trade>> {
        self.inner.rest.fetch_recent_trades(pair, max_count).await
    }

    pub async fn fetch_candles(
        &self,
        pair: &str,
        period_secs: u32,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        count: Option<u32>,
    ) -> Result<Vec<Candle>> {
        self.inner
            .rest
            .fetch_candles(pair, period_secs, from, to, count)
            .await
    }

    pub async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        self.inner.rest.fetch_ticker(pair).await
    }

    /// `Ok(None)` when the venue has no market between the two currencies
    pub async fn calculate_cross_rate(&self, from: &str, to: &str) -> Result<Option<Decimal>> {
        self.inner.rest.calculate_cross_rate(from, to).await
    }

    pub async fn calculate_cross_rates(
        &self,
        holdings: &[(String, Decimal)],
        targets: &[String],
    ) -> Result<CrossRateMatrix> {
        self.inner.rest.calculate_cross_rates(holdings, targets).await
    }

    /// Receiver for buy trades, sell trades and candles
    pub fn events(&self) -> broadcast::Receiver<MarketEvent> {
        self.inner.publisher.subscribe()
    }

    /// Latest bar values received for a pair, oldest first
    pub fn candles(&self, pair: &str) -> Vec<Candle> {
        self.inner.publisher.candles(pair)
    }

    /// Most recent bar received for a pair
    pub fn latest_candle(&self, pair: &str) -> Option<Candle> {
        self.inner.publisher.latest_candle(pair)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn is_session_started(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Stream trades for a pair.
    ///
    /// Returns false when the pair is already subscribed or a request is in
    /// flight. The exchange has no per-subscription trade limit, so
    /// `max_count` only applies to REST history. The first subscription starts
    /// the session and fails with [`ConnectorError::NoRuntime`] outside a Tokio
    /// runtime.
    pub fn subscribe_trades(&self, pair: &str, max_count: u32) -> Result<bool> {
        debug!(pair = %pair, max_count, "Subscribing to trades");
        let frame = Request::subscribe_trades(pair).to_frame()?;
        self.subscribe(ChannelKey::trades(pair), frame)
    }

    pub fn unsubscribe_trades(&self, pair: &str) -> Result<bool> {
        self.unsubscribe(ChannelKey::trades(pair))
    }

    /// Stream candles for a pair.
    ///
    /// The period must be a supported timeframe. The range and count have no
    /// socket counterpart; the exchange always opens with its own snapshot.
    pub fn subscribe_candles(
        &self,
        pair: &str,
        period_secs: u32,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        count: Option<u32>,
    ) -> Result<bool> {
        let timeframe = timeframe_for_period(period_secs)?;
        debug!(pair = %pair, timeframe, from = ?from, to = ?to, count = ?count, "Subscribing to candles");
        let frame = Request::subscribe_candles(pair, timeframe).to_frame()?;
        self.subscribe(ChannelKey::candles(pair), frame)
    }

    pub fn unsubscribe_candles(&self, pair: &str) -> Result<bool> {
        self.unsubscribe(ChannelKey::candles(pair))
    }

    fn subscribe(&self, key: ChannelKey, frame: String) -> Result<bool> {
        self.ensure_session()?;

        {
            // Held across the registry update so a concurrent rejection of an
            // earlier request cannot remove this one
            let mut requests = self.inner.requests.lock();
            if !self.inner.registry.try_begin_subscribe(&key) {
                debug!(key = %key, "Subscription already active or pending");
                return Ok(false);
            }
            requests.insert(key.clone(), frame.clone());
        }

        if let Err(e) = self.inner.transport.send(frame) {
            self.inner.requests.lock().remove(&key);
            self.inner.registry.abandon_pending(&key);
            return Err(e);
        }

        info!(key = %key, "Subscribe request sent");
        Ok(true)
    }

    /// Ask the exchange to close a bound channel. Local state is only cleared
    /// once the exchange confirms.
    fn unsubscribe(&self, key: ChannelKey) -> Result<bool> {
        self.inner.requests.lock().remove(&key);

        let chan_id = match self.inner.registry.lookup_id(&key) {
            Some(id) => id,
            None => {
                debug!(key = %key, "Unsubscribe for unbound channel ignored");
                return Ok(false);
            }
        };

        self.inner
            .transport
            .send(Request::unsubscribe(chan_id).to_frame()?)?;
        info!(key = %key, chan_id, "Unsubscribe request sent");
        Ok(true)
    }

    /// Start the transport and the dispatch task once
    fn ensure_session(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|e| ConnectorError::NoRuntime(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.transport.start(tx)?;
        *session = Some(runtime.spawn(dispatch_loop(self.inner.clone(), rx)));
        info!("Socket session started");
        Ok(())
    }
}

impl<T: Transport> Drop for Connector<T> {
    fn drop(&mut self) {
        if let Some(task) = self.session.lock().take() {
            task.abort();
        }
    }
}

impl<T: Transport> Inner<T> {
    /// Stop replaying a subscription the exchange refused, unless the caller
    /// has already asked for it again
    fn forget_rejected(&self, key: &ChannelKey) {
        let mut requests = self.requests.lock();
        if self.registry.state(key) == SubscriptionState::Unbound {
            requests.remove(key);
        }
    }

    /// The exchange forgets every channel when the socket drops; request them again
    fn resubscribe(&self) {
        let stale = self.registry.drain();
        let requests: Vec<(ChannelKey, String)> = self
            .requests
            .lock()
            .iter()
            .map(|(k, f)| (k.clone(), f.clone()))
            .collect();
        info!(stale = stale.len(), resubscribing = requests.len(), "Restoring subscriptions");

        for (key, frame) in requests {
            if !self.registry.try_begin_subscribe(&key) {
                continue;
            }
            if let Err(e) = self.transport.send(frame) {
                warn!(key = %key, error = %e, "Failed to restore subscription");
                self.registry.abandon_pending(&key);
            }
        }
    }
}

async fn dispatch_loop<T: Transport>(
    inner: Arc<Inner<T>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(raw) => {
                if let Some(rejected) = inner.dispatcher.handle_message(&raw) {
                    inner.forget_rejected(&rejected);
                }
            }
            SessionEvent::Reconnected => inner.resubscribe(),
        }
    }
    debug!("Session event stream closed");
}
