//! Candle store
//!
//! Manages candle series for multiple pairs.

use std::collections::HashMap;

use super::CandleSeries;
use crate::types::Candle;

/// Default number of bars kept per pair
pub const DEFAULT_MAX_BARS: usize = 1_000;

/// Candle series keyed by pair
#[derive(Debug)]
pub struct CandleStore {
    series: HashMap<String, CandleSeries>,
    max_bars: usize,
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleStore {
    pub fn new() -> Self {
        Self::with_max_bars(DEFAULT_MAX_BARS)
    }

    pub fn with_max_bars(max_bars: usize) -> Self {
        Self {
            series: HashMap::new(),
            max_bars,
        }
    }

    /// Record a candle, replacing any bar with the same open time
    pub fn upsert(&mut self, candle: Candle) -> bool {
        let max_bars = self.max_bars;
        self.series
            .entry(candle.pair.clone())
            .or_insert_with(|| CandleSeries::new(max_bars))
            .upsert(candle)
    }

    /// Bars for a pair, oldest first
    pub fn bars(&self, pair: &str) -> Vec<Candle> {
        self.series.get(pair).map(|s| s.bars()).unwrap_or_default()
    }

    pub fn latest(&self, pair: &str) -> Option<Candle> {
        self.series.get(pair).and_then(|s| s.latest().cloned())
    }

    /// Forget a pair once its feed is gone
    pub fn remove(&mut self, pair: &str) -> bool {
        self.series.remove(pair).is_some()
    }
}
