//! Cross-rate helpers

use rust_decimal::Decimal;
use serde::Serialize;

/// Currency codes that Bitfinex lists under a different ticker
const CURRENCY_ALIASES: [(&str, &str); 3] = [("USDT", "UST"), ("DASH", "DSH"), ("IOTA", "IOT")];

/// Upper-case a currency code and map it to the exchange's own code
pub(crate) fn normalize_currency(code: &str) -> String {
    let code = code.trim().to_uppercase();
    CURRENCY_ALIASES
        .iter()
        .find(|(common, _)| *common == code)
        .map(|(_, exchange)| exchange.to_string())
        .unwrap_or(code)
}

/// Trading symbol for a currency pair, e.g. `tBTCUSD` or `tTESTBTC:TESTUSD`
pub fn market_symbol(base: &str, quote: &str) -> String {
    if base.len() > 3 || quote.len() > 3 {
        format!("t{}:{}", base, quote)
    } else {
        format!("t{}{}", base, quote)
    }
}

/// One source currency valued in every target currency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossRateRow {
    pub currency: String,
    pub amount: Decimal,
    /// `amount * rate` per target, `None` where no market exists
    pub values: Vec<Option<Decimal>>,
}

/// Holdings valued across a set of target currencies
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossRateMatrix {
    pub targets: Vec<String>,
    pub rows: Vec<CrossRateRow>,
}

impl CrossRateMatrix {
    /// Build the matrix from rates ordered holding-major, target-minor
    pub fn from_rates(
        holdings: &[(String, Decimal)],
        targets: &[String],
        rates: &[Option<Decimal>],
    ) -> Self {
        let width = targets.len();
        let rows = holdings
            .iter()
            .enumerate()
            .map(|(i, (currency, amount))| {
                let row_rates = rates.get(i * width..(i + 1) * width).unwrap_or_default();
                CrossRateRow {
                    currency: currency.clone(),
                    amount: *amount,
                    values: row_rates.iter().map(|rate| rate.map(|r| r * *amount)).collect(),
                }
            })
            .collect();

        Self {
            targets: targets.to_vec(),
            rows,
        }
    }

    /// Value of `currency` holdings in `target`
    pub fn value(&self, currency: &str, target: &str) -> Option<Decimal> {
        let column = self.targets.iter().position(|t| t == target)?;
        self.rows
            .iter()
            .find(|row| row.currency == currency)
            .and_then(|row| row.values.get(column).copied().flatten())
    }
}
