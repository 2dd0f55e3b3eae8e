//! Configuration module for the connector

use serde::Deserialize;
use std::env;

use crate::error::{ConnectorError, Result};
use crate::timeframe::{supported_periods, timeframe_for_period};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// REST API base URL
    pub rest_endpoint: String,

    /// WebSocket endpoint
    pub ws_endpoint: String,

    /// Pairs to stream trades for (e.g., ["tBTCUSD", "tETHUSD"])
    pub trade_pairs: Vec<String>,

    /// Pairs to stream candles for
    pub candle_pairs: Vec<String>,

    /// Candle period in seconds; must be a supported timeframe
    pub candle_period_secs: u32,

    /// Trade count requested from REST history and socket subscriptions
    pub trades_limit: u32,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    /// Events buffered per subscriber before it starts lagging
    pub event_channel_capacity: usize,

    /// Port for the health and metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            trade_pairs: env::var("TRADE_PAIRS")
                .map(|v| parse_pairs(&v))
                .unwrap_or(defaults.trade_pairs),
            candle_pairs: env::var("CANDLE_PAIRS")
                .map(|v| parse_pairs(&v))
                .unwrap_or(defaults.candle_pairs),
            candle_period_secs: env_or("CANDLE_PERIOD_SECS", defaults.candle_period_secs),
            trades_limit: env_or("TRADES_LIMIT", defaults.trades_limit),
            reconnect_delay_ms: env_or("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            max_reconnect_attempts: env_or("MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts),
            event_channel_capacity: env_or("EVENT_CHANNEL_CAPACITY", defaults.event_channel_capacity),
            health_port: env_or("HEALTH_PORT", defaults.health_port),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the exchange cannot serve
    pub fn validate(&self) -> Result<()> {
        timeframe_for_period(self.candle_period_secs).map_err(|e| {
            let supported: Vec<u32> = supported_periods().collect();
            ConnectorError::Config(format!("CANDLE_PERIOD_SECS: {}; supported: {:?}", e, supported))
        })?;
        if self.event_channel_capacity == 0 {
            return Err(ConnectorError::Config(
                "EVENT_CHANNEL_CAPACITY must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a numeric variable, falling back to the default when unset or invalid
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_pairs(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://api-pub.bitfinex.com/v2".to_string(),
            ws_endpoint: "wss://api-pub.bitfinex.com/ws/2".to_string(),
            trade_pairs: vec!["tBTCUSD".to_string()],
            candle_pairs: vec!["tBTCUSD".to_string()],
            candle_period_secs: 60,
            trades_limit: 100,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 0,
            event_channel_capacity: 1024,
            health_port: 9090,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_unsupported_period_rejected() {
        let config = Config {
            candle_period_secs: 42,
            ..Config::default()
        };
        match config.validate() {
            Err(ConnectorError::Config(msg)) => {
                assert!(msg.contains("42"));
                assert!(msg.contains("3600"));
            }
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pairs_keeps_case_and_skips_blanks() {
        assert_eq!(
            parse_pairs(" tBTCUSD, ,tTESTBTC:TESTUSD "),
            vec!["tBTCUSD".to_string(), "tTESTBTC:TESTUSD".to_string()]
        );
    }
}
