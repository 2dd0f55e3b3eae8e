//! Domain types shared by the REST and socket paths

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConnectorError, Result};

/// Server-assigned numeric channel identifier
pub type ChannelId = u64;

/// Kind of live feed a subscription carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Trades,
    Candles,
}

impl ChannelKind {
    /// Channel name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Trades => "trades",
            ChannelKind::Candles => "candles",
        }
    }

    /// Parse a wire channel name
    pub fn from_wire(channel: &str) -> Option<Self> {
        match channel {
            "trades" => Some(ChannelKind::Trades),
            "candles" => Some(ChannelKind::Candles),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing identity of a logical subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub pair: String,
    pub kind: ChannelKind,
}

impl ChannelKey {
    pub fn new(pair: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            pair: pair.into(),
            kind,
        }
    }

    pub fn trades(pair: impl Into<String>) -> Self {
        Self::new(pair, ChannelKind::Trades)
    }

    pub fn candles(pair: impl Into<String>) -> Self {
        Self::new(pair, ChannelKind::Candles)
    }

    /// The same channel under the other spelling of a trading pair.
    ///
    /// The exchange accepts `BTCUSD` and `tBTCUSD` alike but echoes its own
    /// form back. Funding symbols (`fUSD`) have no alternate.
    pub fn alternate(&self) -> Option<ChannelKey> {
        let mut chars = self.pair.chars();
        match (chars.next(), chars.next()) {
            (Some('t'), Some(c)) if c.is_ascii_uppercase() || c.is_ascii_digit() => {
                Some(Self::new(&self.pair[1..], self.kind))
            }
            (Some(c), _) if c.is_ascii_uppercase() || c.is_ascii_digit() => {
                Some(Self::new(format!("t{}", self.pair), self.kind))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.pair)
    }
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side implied by a signed trade amount; zero counts as a buy
    pub fn from_amount(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single executed trade
///
/// The side is always derived from the sign of `amount`, so there is no way
/// to build a trade whose side disagrees with its amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub pair: String,
    pub price: Decimal,
    /// Signed amount, negative for sells
    pub amount: Decimal,
    side: Side,
    pub time: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        id: impl Into<String>,
        pair: impl Into<String>,
        price: Decimal,
        amount: Decimal,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            pair: pair.into(),
            price,
            amount,
            side: Side::from_amount(amount),
            time,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

/// OHLCV bar; the bar for a given `open_time` is mutable until its period elapses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Ticker snapshot
///
/// Trading pairs fill the first ten fields. Funding currencies additionally
/// carry the flash return rate and bid/ask periods.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ticker {
    pub bid: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub daily_change: Option<Decimal>,
    pub daily_change_relative: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub frr: Option<Decimal>,
    pub bid_period: Option<i64>,
    pub ask_period: Option<i64>,
    pub frr_amount_available: Option<Decimal>,
}

const TRADING_TICKER_LEN: usize = 10;
const FUNDING_TICKER_MIN_LEN: usize = 13;
const FRR_AMOUNT_AVAILABLE_POS: usize = 15;

impl Ticker {
    /// Decode a positional ticker payload by its length
    pub fn from_fields(data: &[Option<Decimal>]) -> Result<Self> {
        match data.len() {
            TRADING_TICKER_LEN => Ok(Self {
                bid: data[0],
                bid_size: data[1],
                ask: data[2],
                ask_size: data[3],
                daily_change: data[4],
                daily_change_relative: data[5],
                last_price: data[6],
                volume: data[7],
                high: data[8],
                low: data[9],
                ..Self::default()
            }),
            len if len >= FUNDING_TICKER_MIN_LEN => Ok(Self {
                frr: data[0],
                bid: data[1],
                bid_period: data[2].and_then(|p| p.to_i64()),
                bid_size: data[3],
                ask: data[4],
                ask_period: data[5].and_then(|p| p.to_i64()),
                ask_size: data[6],
                daily_change: data[7],
                daily_change_relative: data[8],
                last_price: data[9],
                volume: data[10],
                high: data[11],
                low: data[12],
                frr_amount_available: data.get(FRR_AMOUNT_AVAILABLE_POS).copied().flatten(),
            }),
            len => Err(ConnectorError::UnexpectedTickerFormat(len)),
        }
    }
}

/// Convert exchange epoch milliseconds to a UTC instant
pub fn timestamp_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(ConnectorError::InvalidTimestamp(ms))
}
