//! Prometheus metrics for the connector
//!
//! Metric registration uses `unwrap()`: a failure means a duplicate metric
//! name, which is a programming error caught at first use.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Inbound socket frames handed to the dispatcher.
pub static MESSAGES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "bfx_messages_received_total",
        "Inbound WebSocket frames processed by the dispatcher"
    )
    .unwrap()
});

/// Frames that produced no event.
/// Labels: reason (empty/decode/unrouted/unknown)
pub static MESSAGES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bfx_messages_dropped_total",
        "Inbound frames dropped without producing an event",
        &["reason"]
    )
    .unwrap()
});

/// Trades published to subscribers.
/// Labels: side (buy/sell)
pub static TRADES_EMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bfx_trades_emitted_total",
        "Trades published to event subscribers",
        &["side"]
    )
    .unwrap()
});

pub static CANDLES_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "bfx_candles_emitted_total",
        "Candles published to event subscribers"
    )
    .unwrap()
});

pub static WS_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "bfx_ws_reconnects_total",
        "WebSocket sessions re-established after a disconnect"
    )
    .unwrap()
});

pub(crate) fn record_drop(reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
}
