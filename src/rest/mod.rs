//! REST module for the public Bitfinex v2 HTTP API
//!
//! Stateless request/response operations: trade history, candle history,
//! tickers and cross rates derived from ticker prices.

mod client;
mod cross_rate;

pub use client::RestClient;
pub use cross_rate::{market_symbol, CrossRateMatrix, CrossRateRow};
