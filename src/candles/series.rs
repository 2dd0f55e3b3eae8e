//! Candle series for a single pair
//!
//! Uses BTreeMap keyed by open time, so bars stay sorted and an update for an
//! existing open time overwrites it.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::types::Candle;

/// Bars for one pair, oldest first
#[derive(Debug)]
pub struct CandleSeries {
    bars: BTreeMap<DateTime<Utc>, Candle>,
    /// Maximum number of bars to retain
    max_len: usize,
}

impl CandleSeries {
    pub fn new(max_len: usize) -> Self {
        Self {
            bars: BTreeMap::new(),
            max_len,
        }
    }

    /// Insert or replace the bar at `candle.open_time`
    ///
    /// Returns true if an existing bar was replaced
    pub fn upsert(&mut self, candle: Candle) -> bool {
        let replaced = self.bars.insert(candle.open_time, candle).is_some();
        self.trim();
        replaced
    }

    /// Drop the oldest bars beyond the retention limit
    fn trim(&mut self) {
        while self.bars.len() > self.max_len {
            self.bars.pop_first();
        }
    }

    /// Most recent bar
    pub fn latest(&self) -> Option<&Candle> {
        self.bars.last_key_value().map(|(_, c)| c)
    }

    /// All retained bars, oldest first
    pub fn bars(&self) -> Vec<Candle> {
        self.bars.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
