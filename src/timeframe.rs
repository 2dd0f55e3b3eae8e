//! Candle period <-> exchange timeframe tag mapping

use crate::error::{ConnectorError, Result};

/// Supported periods in seconds and their wire tags
const TIMEFRAMES: [(u32, &str); 12] = [
    (60, "1m"),
    (300, "5m"),
    (900, "15m"),
    (1_800, "30m"),
    (3_600, "1h"),
    (10_800, "3h"),
    (21_600, "6h"),
    (43_200, "12h"),
    (86_400, "1D"),
    (604_800, "1W"),
    (1_209_600, "14D"),
    (2_592_000, "1M"),
];

/// Wire tag for a candle period. Periods outside the table are rejected.
pub fn timeframe_for_period(period_secs: u32) -> Result<&'static str> {
    TIMEFRAMES
        .iter()
        .find(|(secs, _)| *secs == period_secs)
        .map(|(_, tag)| *tag)
        .ok_or(ConnectorError::UnknownTimeframe(period_secs))
}

/// All supported periods, shortest first
pub fn supported_periods() -> impl Iterator<Item = u32> {
    TIMEFRAMES.iter().map(|(secs, _)| *secs)
}
