//! Candle module
//!
//! Keeps the latest value of every bar per pair, so that repeated updates for
//! a still-open bar replace each other instead of piling up.

mod series;
mod store;

pub use series::CandleSeries;
pub use store::CandleStore;
