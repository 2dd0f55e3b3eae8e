//! Bitfinex Market Data Connector Library
//!
//! Public market data from Bitfinex: REST history (trades, candles, tickers,
//! cross rates) and streamed trades and candles over a single WebSocket
//! session, published to subscribers as [`MarketEvent`]s.

pub mod candles;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod parser;
pub mod publisher;
pub mod registry;
pub mod rest;
pub mod timeframe;
pub mod types;
pub mod websocket;

pub use candles::{CandleSeries, CandleStore};
pub use config::Config;
pub use connector::Connector;
pub use dispatcher::Dispatcher;
pub use error::{ConnectorError, Result};
pub use parser::{ControlEvent, ParsedMessage, Request};
pub use publisher::{EventPublisher, MarketEvent};
pub use registry::{SubscriptionRegistry, SubscriptionState};
pub use rest::{market_symbol, CrossRateMatrix, CrossRateRow, RestClient};
pub use types::{Candle, ChannelId, ChannelKey, ChannelKind, Side, Ticker, Trade};
pub use websocket::{SessionEvent, Transport, TransportConfig, WebSocketTransport};
