//! REST client for the public Bitfinex endpoints

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::cross_rate::{market_symbol, normalize_currency, CrossRateMatrix};
use crate::error::{ConnectorError, Result};
use crate::parser::{RawCandle, RawTrade};
use crate::timeframe::timeframe_for_period;
use crate::types::{Candle, Ticker, Trade};

/// Exchange error code for an unknown symbol
const SYMBOL_INVALID: i64 = 10020;

/// HTTP client for market data requests
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for an endpoint such as `https://api-pub.bitfinex.com/v2`
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Most recent trades for a pair
    pub async fn fetch_recent_trades(&self, pair: &str, max_count: u32) -> Result<Vec<Trade>> {
        let path = format!("trades/{}/hist", pair);
        let rows: Vec<RawTrade> = self.get(&path, &[("limit", max_count.to_string())]).await?;

        rows.into_iter().map(|row| row.into_trade(pair)).collect()
    }

    /// Candle history for a pair
    ///
    /// The period must be one of the supported timeframes; anything else fails
    /// before a request is made.
    pub async fn fetch_candles(
        &self,
        pair: &str,
        period_secs: u32,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        count: Option<u32>,
    ) -> Result<Vec<Candle>> {
        let timeframe = timeframe_for_period(period_secs)?;
        let path = format!("candles/trade:{}:{}/hist", timeframe, pair);

        let mut query = Vec::new();
        if let Some(from) = from {
            query.push(("start", from.timestamp_millis().to_string()));
        }
        if let Some(to) = to {
            query.push(("end", to.timestamp_millis().to_string()));
        }
        if let Some(count) = count {
            query.push(("limit", count.to_string()));
        }

        let rows: Vec<RawCandle> = self.get(&path, &query).await?;
        rows.into_iter().map(|row| row.into_candle(pair)).collect()
    }

    /// Ticker snapshot for a trading pair or funding currency
    pub async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        let fields: Vec<Option<Decimal>> = self.get(&format!("ticker/{}", pair), &[]).await?;
        Ticker::from_fields(&fields)
    }

    /// Rate to convert one unit of `from` into `to`
    ///
    /// Uses the direct market if it exists, otherwise the inverse market.
    /// `Ok(None)` means the venue lists neither; request failures are errors.
    pub async fn calculate_cross_rate(&self, from: &str, to: &str) -> Result<Option<Decimal>> {
        let from = normalize_currency(from);
        let to = normalize_currency(to);
        if from == to {
            return Ok(Some(Decimal::ONE));
        }

        if let Some(price) = self.last_price(&market_symbol(&from, &to)).await? {
            return Ok(Some(price));
        }

        match self.last_price(&market_symbol(&to, &from)).await? {
            Some(price) if !price.is_zero() => Ok(Some(Decimal::ONE / price)),
            _ => {
                debug!(from = %from, to = %to, "No market for currency pair");
                Ok(None)
            }
        }
    }

    /// Value every holding in every target currency
    ///
    /// All legs run concurrently; the first failed request fails the batch.
    pub async fn calculate_cross_rates(
        &self,
        holdings: &[(String, Decimal)],
        targets: &[String],
    ) -> Result<CrossRateMatrix> {
        let legs = holdings
            .iter()
            .flat_map(|(from, _)| targets.iter().map(move |to| (from, to)))
            .map(|(from, to)| self.calculate_cross_rate(from, to));

        let rates = try_join_all(legs).await?;
        info!(legs = rates.len(), "Cross rates calculated");

        Ok(CrossRateMatrix::from_rates(holdings, targets, &rates))
    }

    /// Last traded price of a market, `None` when the market does not exist
    async fn last_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        match self
            .get::<Vec<Option<Decimal>>>(&format!("ticker/{}", symbol), &[])
            .await
        {
            Ok(fields) if fields.is_empty() => Ok(None),
            Ok(fields) => Ok(Ticker::from_fields(&fields)?.last_price),
            Err(ConnectorError::Api {
                code: SYMBOL_INVALID,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, query = ?query, "REST request");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), &url, &body));
        }

        Ok(response.json::<T>().await?)
    }
}

/// Map a non-2xx response to an error, keeping exchange error codes when the
/// body is an `["error", code, message]` triple
fn error_from_response(status: u16, url: &str, body: &str) -> ConnectorError {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
        if let [Value::String(tag), code, message, ..] = items.as_slice() {
            if tag == "error" {
                if let Some(code) = code.as_i64() {
                    return ConnectorError::Api {
                        code,
                        message: message.as_str().unwrap_or_default().to_string(),
                    };
                }
            }
        }
    }

    ConnectorError::Http {
        status,
        url: url.to_string(),
    }
}
