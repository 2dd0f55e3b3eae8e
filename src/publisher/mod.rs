//! Publisher module for domain events
//!
//! Fans decoded trades and candles out to every subscribed receiver over a
//! broadcast channel. Each receiver sees events in emission order; a slow
//! receiver lags on its own without blocking the dispatcher or other receivers.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::candles::CandleStore;
use crate::metrics::{CANDLES_EMITTED, TRADES_EMITTED};
use crate::types::{Candle, Side, Trade};

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MarketEvent {
    BuyTrade(Trade),
    SellTrade(Trade),
    Candle(Candle),
}

/// Broadcasts market events and keeps the latest candle bars
pub struct EventPublisher {
    tx: broadcast::Sender<MarketEvent>,
    candles: RwLock<CandleStore>,
}

impl EventPublisher {
    /// Create a publisher whose receivers buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            candles: RwLock::new(CandleStore::new()),
        }
    }

    /// Register a new receiver; it sees events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    /// Publish a trade as a buy or sell event
    pub fn publish_trade(&self, trade: Trade) {
        let side = trade.side();
        let event = match side {
            Side::Buy => MarketEvent::BuyTrade(trade),
            Side::Sell => MarketEvent::SellTrade(trade),
        };
        TRADES_EMITTED.with_label_values(&[side.as_str()]).inc();
        self.send(event);
    }

    /// Record and publish a candle
    pub fn publish_candle(&self, candle: Candle) {
        let replaced = self.candles.write().upsert(candle.clone());
        trace!(pair = %candle.pair, open_time = %candle.open_time, replaced, "Candle recorded");
        CANDLES_EMITTED.inc();
        self.send(MarketEvent::Candle(candle));
    }

    /// Latest bars for a pair, oldest first
    pub fn candles(&self, pair: &str) -> Vec<Candle> {
        self.candles.read().bars(pair)
    }

    pub fn latest_candle(&self, pair: &str) -> Option<Candle> {
        self.candles.read().latest(pair)
    }

    /// Forget stored bars once a candle feed is closed
    pub fn clear_candles(&self, pair: &str) {
        self.candles.write().remove(pair);
    }

    fn send(&self, event: MarketEvent) {
        // Having no receivers is normal, not a failure
        if self.tx.send(event).is_err() {
            debug!("No event subscribers, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::timestamp_from_millis;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_trades_split_by_side() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let t = timestamp_from_millis(1_000).unwrap();

        publisher.publish_trade(Trade::new("1", "tBTCUSD", dec!(1), dec!(0.5), t));
        publisher.publish_trade(Trade::new("2", "tBTCUSD", dec!(1), dec!(-0.5), t));

        assert!(matches!(rx.recv().await.unwrap(), MarketEvent::BuyTrade(tr) if tr.id == "1"));
        assert!(matches!(rx.recv().await.unwrap(), MarketEvent::SellTrade(tr) if tr.id == "2"));
    }

    #[tokio::test]
    async fn test_every_receiver_gets_every_event() {
        let publisher = EventPublisher::new(16);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        let t = timestamp_from_millis(1_000).unwrap();

        publisher.publish_trade(Trade::new("1", "tBTCUSD", dec!(1), dec!(1), t));

        assert_eq!(a.recv().await.unwrap(), b.recv().await.unwrap());
    }

    #[test]
    fn test_publish_without_receivers_is_harmless() {
        let publisher = EventPublisher::new(4);
        publisher.publish_candle(Candle {
            pair: "tBTCUSD".to_string(),
            open_time: timestamp_from_millis(60_000).unwrap(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(2),
            volume: dec!(3),
        });
        assert_eq!(publisher.candles("tBTCUSD").len(), 1);
        publisher.clear_candles("tBTCUSD");
        assert!(publisher.latest_candle("tBTCUSD").is_none());
    }
}
