//! Message dispatcher
//!
//! Decodes each inbound frame against the subscription registry and routes the
//! result: control events update the registry, payloads become domain events.
//! A frame that fails to decode is dropped on its own; the next frame is
//! processed as usual.

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::metrics::{record_drop, MESSAGES_RECEIVED};
use crate::parser::{ControlEvent, ParsedMessage, STATUS_OK};
use crate::publisher::EventPublisher;
use crate::registry::SubscriptionRegistry;
use crate::types::{ChannelKey, ChannelKind};

/// Info code asking clients to reconnect
const INFO_RECONNECT: i64 = 20051;

/// Routes inbound socket frames
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    publisher: Arc<EventPublisher>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            registry,
            publisher,
        }
    }

    /// Process a single raw frame. Never fails; problems are logged and counted.
    ///
    /// Returns the subscription the exchange refused, if this frame was such a
    /// refusal; its pending state has already been released.
    pub fn handle_message(&self, raw: &str) -> Option<ChannelKey> {
        MESSAGES_RECEIVED.inc();

        if raw.trim().is_empty() {
            record_drop("malformed");
            return None;
        }

        match ParsedMessage::parse(raw, |id| self.registry.lookup_key(id)) {
            Ok(message) => self.route(message),
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Failed to decode message");
                record_drop(if e.is_decode() { "decode" } else { "invalid" });
                None
            }
        }
    }

    /// Apply a decoded message
    pub fn route(&self, message: ParsedMessage) -> Option<ChannelKey> {
        match message {
            ParsedMessage::Control(event) => return self.apply_control(event),
            ParsedMessage::Heartbeat => trace!("Heartbeat"),
            ParsedMessage::TradeSnapshot { key, trades } => {
                debug!(key = %key, count = trades.len(), "Replaying trade snapshot");
                for trade in trades {
                    self.publisher.publish_trade(trade);
                }
            }
            ParsedMessage::TradeUpdate { trade, .. } => self.publisher.publish_trade(trade),
            ParsedMessage::CandleSnapshot { key, candles } => {
                debug!(key = %key, count = candles.len(), "Replaying candle snapshot");
                for candle in candles {
                    self.publisher.publish_candle(candle);
                }
            }
            ParsedMessage::CandleUpdate { candle, .. } => self.publisher.publish_candle(candle),
            ParsedMessage::Unrouted(chan_id) => {
                debug!(chan_id, "Payload for unknown channel dropped");
                record_drop("unrouted");
            }
            ParsedMessage::Unknown(payload) => {
                trace!(payload = %payload, "Unknown message type");
                record_drop("unknown");
            }
        }
        None
    }

    fn apply_control(&self, event: ControlEvent) -> Option<ChannelKey> {
        match event {
            ControlEvent::Subscribed { chan_id, key } => {
                let key = self.registry.confirm_subscribe(chan_id, key);
                info!(chan_id, key = %key, "Subscription confirmed");
            }
            ControlEvent::Unsubscribed { chan_id, status } => {
                if status.as_deref() != Some(STATUS_OK) {
                    warn!(chan_id, status = ?status, "Unsubscribe not acknowledged, dropping channel anyway");
                }
                match self.registry.confirm_unsubscribe(chan_id) {
                    Some(key) => {
                        info!(chan_id, key = %key, "Unsubscribed");
                        if key.kind == ChannelKind::Candles {
                            self.publisher.clear_candles(&key.pair);
                        }
                    }
                    None => debug!(chan_id, "Unsubscribe confirmed for unknown channel"),
                }
            }
            ControlEvent::Error { key, code, msg } => {
                warn!(key = ?key, code = ?code, msg = ?msg, "Exchange rejected request");
                return key.and_then(|key| self.registry.abandon_pending(&key));
            }
            ControlEvent::Info { code, msg } => {
                if code == Some(INFO_RECONNECT) {
                    warn!(msg = ?msg, "Exchange requested a reconnect");
                } else {
                    info!(code = ?code, msg = ?msg, "Exchange info");
                }
            }
            ControlEvent::Other(event) => debug!(event = %event, "Unhandled control event"),
        }
        None
    }
}
