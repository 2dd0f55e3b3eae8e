//! Parser module for Bitfinex v2 WebSocket messages
//!
//! Every inbound frame is decoded once, here, into a [`ParsedMessage`]. Payload
//! frames only carry a channel id, so decoding them needs a resolver that maps
//! the id back to the subscription it belongs to. Outbound request frames are
//! built here as well so that both directions of the protocol live together.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ConnectorError, Result};
use crate::types::{timestamp_from_millis, Candle, ChannelId, ChannelKey, ChannelKind, Trade};

/// Payload marker for a heartbeat frame
pub const HEARTBEAT: &str = "hb";
/// Payload tag for a single executed trade
pub const TRADE_EXECUTED: &str = "te";
/// Payload tag for a trade update that repeats an earlier `te`
pub const TRADE_UPDATED: &str = "tu";
/// Status reported on a successful unsubscribe
pub const STATUS_OK: &str = "OK";

/// Outbound request frame
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Request {
    Subscribe {
        channel: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "chanId")]
        chan_id: String,
    },
}

impl Request {
    pub fn subscribe_trades(pair: &str) -> Self {
        Request::Subscribe {
            channel: ChannelKind::Trades.as_str(),
            symbol: Some(pair.to_string()),
            key: None,
        }
    }

    pub fn subscribe_candles(pair: &str, timeframe: &str) -> Self {
        Request::Subscribe {
            channel: ChannelKind::Candles.as_str(),
            symbol: None,
            key: Some(candle_key(timeframe, pair)),
        }
    }

    pub fn unsubscribe(chan_id: ChannelId) -> Self {
        Request::Unsubscribe {
            chan_id: chan_id.to_string(),
        }
    }

    /// Serialize to the text frame sent on the socket
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Candle channel key, e.g. `trade:1m:tBTCUSD`
pub fn candle_key(timeframe: &str, pair: &str) -> String {
    format!("trade:{}:{}", timeframe, pair)
}

/// Pair part of a candle channel key. Pairs may themselves contain `:`.
pub fn pair_from_candle_key(key: &str) -> Option<&str> {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(pair)) if !pair.is_empty() => Some(pair),
        _ => None,
    }
}

/// Control frame received on the socket
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Subscribed {
        chan_id: ChannelId,
        key: ChannelKey,
    },
    Unsubscribed {
        chan_id: ChannelId,
        status: Option<String>,
    },
    /// A request was rejected; `key` is set when the rejected request was a subscribe
    Error {
        key: Option<ChannelKey>,
        code: Option<i64>,
        msg: Option<String>,
    },
    Info {
        code: Option<i64>,
        msg: Option<String>,
    },
    Other(String),
}

/// Fully decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    Control(ControlEvent),
    Heartbeat,
    TradeSnapshot { key: ChannelKey, trades: Vec<Trade> },
    TradeUpdate { key: ChannelKey, trade: Trade },
    CandleSnapshot { key: ChannelKey, candles: Vec<Candle> },
    CandleUpdate { key: ChannelKey, candle: Candle },
    /// Payload for a channel id nobody is bound to
    Unrouted(ChannelId),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket text frame
    pub fn parse<F>(raw: &str, resolve: F) -> Result<Self>
    where
        F: FnOnce(ChannelId) -> Option<ChannelKey>,
    {
        let value: Value = serde_json::from_str(raw)?;

        if value.get("event").is_some() {
            let event: EventMessage = serde_json::from_value(value)?;
            return Ok(ParsedMessage::Control(event.into_control()?));
        }

        match value {
            Value::Array(items) => Self::parse_channel_frame(&items, resolve),
            _ => Ok(ParsedMessage::Unknown(raw.to_string())),
        }
    }

    fn parse_channel_frame<F>(items: &[Value], resolve: F) -> Result<Self>
    where
        F: FnOnce(ChannelId) -> Option<ChannelKey>,
    {
        if items.len() < 2 || items[1].as_str() == Some(HEARTBEAT) {
            return Ok(ParsedMessage::Heartbeat);
        }

        let chan_id = items[0]
            .as_u64()
            .ok_or_else(|| ConnectorError::InvalidPayload(format!("channel id {}", items[0])))?;

        let key = match resolve(chan_id) {
            Some(key) => key,
            None => return Ok(ParsedMessage::Unrouted(chan_id)),
        };

        match key.kind {
            ChannelKind::Trades => Self::parse_trades(key, items),
            ChannelKind::Candles => Self::parse_candles(key, &items[1]),
        }
    }

    fn parse_trades(key: ChannelKey, items: &[Value]) -> Result<Self> {
        match &items[1] {
            Value::Array(rows) => {
                let mut trades = rows
                    .iter()
                    .map(|row| decode_trade(&key.pair, row))
                    .collect::<Result<Vec<_>>>()?;
                trades.sort_by_key(|t| t.time);
                Ok(ParsedMessage::TradeSnapshot { key, trades })
            }
            Value::String(tag) if tag == TRADE_EXECUTED => {
                let row = items.get(2).ok_or_else(|| {
                    ConnectorError::InvalidPayload("trade update without body".to_string())
                })?;
                let trade = decode_trade(&key.pair, row)?;
                Ok(ParsedMessage::TradeUpdate { key, trade })
            }
            other => Ok(ParsedMessage::Unknown(other.to_string())),
        }
    }

    fn parse_candles(key: ChannelKey, payload: &Value) -> Result<Self> {
        let rows = match payload {
            Value::Array(rows) => rows,
            other => return Ok(ParsedMessage::Unknown(other.to_string())),
        };

        if rows.first().map_or(true, Value::is_array) {
            let mut candles = rows
                .iter()
                .map(|row| decode_candle(&key.pair, row))
                .collect::<Result<Vec<_>>>()?;
            candles.sort_by_key(|c| c.open_time);
            Ok(ParsedMessage::CandleSnapshot { key, candles })
        } else {
            let candle = decode_candle(&key.pair, payload)?;
            Ok(ParsedMessage::CandleUpdate { key, candle })
        }
    }
}

/// Raw trade tuple `[ID, MTS, AMOUNT, PRICE]`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTrade(u64, i64, Decimal, Decimal);

impl RawTrade {
    pub(crate) fn into_trade(self, pair: &str) -> Result<Trade> {
        let RawTrade(id, mts, amount, price) = self;
        Ok(Trade::new(id.to_string(), pair, price, amount, timestamp_from_millis(mts)?))
    }
}

/// Raw candle tuple `[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawCandle(i64, Decimal, Decimal, Decimal, Decimal, Decimal);

impl RawCandle {
    pub(crate) fn into_candle(self, pair: &str) -> Result<Candle> {
        let RawCandle(mts, open, close, high, low, volume) = self;
        Ok(Candle {
            pair: pair.to_string(),
            open_time: timestamp_from_millis(mts)?,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

fn decode_trade(pair: &str, row: &Value) -> Result<Trade> {
    RawTrade::deserialize(row)
        .map_err(|e| ConnectorError::InvalidPayload(format!("trade {}: {}", row, e)))?
        .into_trade(pair)
}

fn decode_candle(pair: &str, row: &Value) -> Result<Candle> {
    RawCandle::deserialize(row)
        .map_err(|e| ConnectorError::InvalidPayload(format!("candle {}: {}", row, e)))?
        .into_candle(pair)
}

/// Object frame carrying an `event` field
#[derive(Debug, Clone, Deserialize)]
struct EventMessage {
    event: String,
    #[serde(rename = "chanId", default, deserialize_with = "deserialize_chan_id")]
    chan_id: Option<ChannelId>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    pair: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

impl EventMessage {
    fn into_control(self) -> Result<ControlEvent> {
        match self.event.as_str() {
            "subscribed" => {
                let chan_id = self.chan_id.ok_or_else(|| {
                    ConnectorError::InvalidPayload("subscribed event without chanId".to_string())
                })?;
                let key = self.channel_key().ok_or_else(|| {
                    ConnectorError::InvalidPayload(format!(
                        "subscribed event for channel {:?} without pair",
                        self.channel
                    ))
                })?;
                Ok(ControlEvent::Subscribed { chan_id, key })
            }
            "unsubscribed" => {
                let chan_id = self.chan_id.ok_or_else(|| {
                    ConnectorError::InvalidPayload("unsubscribed event without chanId".to_string())
                })?;
                Ok(ControlEvent::Unsubscribed {
                    chan_id,
                    status: self.status,
                })
            }
            "error" => Ok(ControlEvent::Error {
                key: self.channel_key(),
                code: self.code,
                msg: self.msg,
            }),
            "info" => Ok(ControlEvent::Info {
                code: self.code,
                msg: self.msg,
            }),
            _ => Ok(ControlEvent::Other(self.event)),
        }
    }

    /// Trades name the pair in `symbol` (or only `pair`); candles embed it in `key`
    fn channel_key(&self) -> Option<ChannelKey> {
        let kind = ChannelKind::from_wire(self.channel.as_deref()?)?;
        let pair = match kind {
            ChannelKind::Trades => self.symbol.clone().or_else(|| self.pair.clone())?,
            ChannelKind::Candles => pair_from_candle_key(self.key.as_deref()?)?.to_string(),
        };
        Some(ChannelKey::new(pair, kind))
    }
}

/// Channel ids arrive as numbers, but accept numeric strings too
fn deserialize_chan_id<'de, D>(deserializer: D) -> std::result::Result<Option<ChannelId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(u64),
        Str(String),
    }

    match Option::<IdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdRepr::Num(id)) => Ok(Some(id)),
        Some(IdRepr::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn trades_btc(id: ChannelId) -> Option<ChannelKey> {
        (id == 17).then(|| ChannelKey::trades("BTCUSD"))
    }

    fn candles_btc(id: ChannelId) -> Option<ChannelKey> {
        (id == 343351).then(|| ChannelKey::candles("tBTCUSD"))
    }

    #[test]
    fn test_subscribe_frames_match_wire_format() {
        assert_eq!(
            Request::subscribe_trades("BTCUSD").to_frame().unwrap(),
            r#"{"event":"subscribe","channel":"trades","symbol":"BTCUSD"}"#
        );
        assert_eq!(
            Request::subscribe_candles("tBTCUSD", "1m").to_frame().unwrap(),
            r#"{"event":"subscribe","channel":"candles","key":"trade:1m:tBTCUSD"}"#
        );
        assert_eq!(
            Request::unsubscribe(17).to_frame().unwrap(),
            r#"{"event":"unsubscribe","chanId":"17"}"#
        );
    }

    #[test]
    fn test_pair_from_candle_key() {
        assert_eq!(pair_from_candle_key("trade:1m:tBTCUSD"), Some("tBTCUSD"));
        assert_eq!(
            pair_from_candle_key("trade:1h:tTESTBTC:TESTUSD"),
            Some("tTESTBTC:TESTUSD")
        );
        assert_eq!(pair_from_candle_key("trade:1m"), None);
    }

    #[test]
    fn test_parse_subscribed_trades() {
        let raw = r#"{"event":"subscribed","chanId":17,"symbol":"BTCUSD","channel":"trades"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Control(ControlEvent::Subscribed {
                chan_id: 17,
                key: ChannelKey::trades("BTCUSD"),
            })
        );
    }

    #[test]
    fn test_parse_subscribed_trades_venue_shape() {
        let raw = r#"{"event":"subscribed","channel":"trades","chanId":19111,"symbol":"tBTCUSD","pair":"BTCUSD"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Control(ControlEvent::Subscribed {
                chan_id: 19111,
                key: ChannelKey::trades("tBTCUSD"),
            })
        );

        let raw = r#"{"event":"subscribed","channel":"trades","chanId":4,"pair":"ETHUSD"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert!(matches!(
            msg,
            ParsedMessage::Control(ControlEvent::Subscribed { key, .. }) if key == ChannelKey::trades("ETHUSD")
        ));
    }

    #[test]
    fn test_parse_subscribed_candles() {
        let raw = r#"{"event":"subscribed","channel":"candles","chanId":343351,"key":"trade:1m:tBTCUSD"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Control(ControlEvent::Subscribed {
                chan_id: 343351,
                key: ChannelKey::candles("tBTCUSD"),
            })
        );
    }

    #[test]
    fn test_parse_unsubscribed_with_string_id() {
        let raw = r#"{"event":"unsubscribed","status":"OK","chanId":"17"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Control(ControlEvent::Unsubscribed {
                chan_id: 17,
                status: Some("OK".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_subscribe_error() {
        let raw = r#"{"event":"error","msg":"symbol: invalid","code":10300,"channel":"trades","symbol":"tFOOBAR"}"#;
        let msg = ParsedMessage::parse(raw, |_| None).unwrap();
        assert_eq!(
            msg,
            ParsedMessage::Control(ControlEvent::Error {
                key: Some(ChannelKey::trades("tFOOBAR")),
                code: Some(10300),
                msg: Some("symbol: invalid".to_string()),
            })
        );
    }

    #[test]
    fn test_heartbeat_and_short_frames() {
        assert_eq!(ParsedMessage::parse(r#"[17,"hb"]"#, trades_btc).unwrap(), ParsedMessage::Heartbeat);
        assert_eq!(ParsedMessage::parse("[17]", trades_btc).unwrap(), ParsedMessage::Heartbeat);
    }

    #[test]
    fn test_unknown_channel_is_unrouted() {
        let msg = ParsedMessage::parse(r#"[99,"te",[1,1000,0.5,20000]]"#, trades_btc).unwrap();
        assert_eq!(msg, ParsedMessage::Unrouted(99));
    }

    #[test]
    fn test_trade_snapshot_sorted_by_time() {
        let raw = r#"[17,[[3,1002,1,20020],[1,1000,0.5,20000],[2,1001,-0.2,20010]]]"#;
        match ParsedMessage::parse(raw, trades_btc).unwrap() {
            ParsedMessage::TradeSnapshot { key, trades } => {
                assert_eq!(key, ChannelKey::trades("BTCUSD"));
                let ids: Vec<&str> = trades.iter().map(|t| t.id.as_str()).collect();
                assert_eq!(ids, vec!["1", "2", "3"]);
                assert_eq!(trades[1].side(), Side::Sell);
                assert_eq!(trades[1].amount, dec!(-0.2));
            }
            other => panic!("Expected TradeSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_trade_update() {
        let raw = r#"[17,"te",[401597395,1574694478808,-0.005,7245.3]]"#;
        match ParsedMessage::parse(raw, trades_btc).unwrap() {
            ParsedMessage::TradeUpdate { trade, .. } => {
                assert_eq!(trade.id, "401597395");
                assert_eq!(trade.price, dec!(7245.3));
                assert_eq!(trade.side(), Side::Sell);
                assert_eq!(trade.time.timestamp_millis(), 1574694478808);
            }
            other => panic!("Expected TradeUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_trade_repeat_tag_is_not_an_update() {
        let raw = r#"[17,"tu",[401597395,1574694478808,-0.005,7245.3]]"#;
        assert!(matches!(
            ParsedMessage::parse(raw, trades_btc).unwrap(),
            ParsedMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_candle_update_field_order() {
        let raw = r#"[343351,[1574698260000,7379.8,7383.2,7384.1,7379.1,0.92]]"#;
        match ParsedMessage::parse(raw, candles_btc).unwrap() {
            ParsedMessage::CandleUpdate { candle, .. } => {
                assert_eq!(candle.open, dec!(7379.8));
                assert_eq!(candle.close, dec!(7383.2));
                assert_eq!(candle.high, dec!(7384.1));
                assert_eq!(candle.low, dec!(7379.1));
                assert_eq!(candle.volume, dec!(0.92));
            }
            other => panic!("Expected CandleUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_candle_snapshot_sorted_by_open_time() {
        let raw = r#"[343351,[[1574698320000,2,2,2,2,1],[1574698260000,1,1,1,1,1]]]"#;
        match ParsedMessage::parse(raw, candles_btc).unwrap() {
            ParsedMessage::CandleSnapshot { candles, .. } => {
                assert_eq!(candles.len(), 2);
                assert!(candles[0].open_time < candles[1].open_time);
            }
            other => panic!("Expected CandleSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_candle_snapshot() {
        match ParsedMessage::parse("[343351,[]]", candles_btc).unwrap() {
            ParsedMessage::CandleSnapshot { candles, .. } => assert!(candles.is_empty()),
            other => panic!("Expected CandleSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_rows_fail() {
        assert!(ParsedMessage::parse(r#"[343351,[1,2,3]]"#, candles_btc).is_err());
        assert!(ParsedMessage::parse(r#"[17,[[1,"x",1,1]]]"#, trades_btc).is_err());
        assert!(ParsedMessage::parse("not json", trades_btc).is_err());
    }
}
