//! Stock Price Types
//!
//! The live price payload pushed by the trading backend on
//! `/topic/price/{stockCode}` and the destination naming helpers.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "stockCode": "005930",
//!   "stockName": "삼성전자",
//!   "currentPrice": 75000,
//!   "changePrice": 1500,
//!   "changeRate": 2.04,
//!   "volume": 25678432,
//!   "timestamp": 1700000000000
//! }
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prefix of every price topic destination.
pub const PRICE_TOPIC_PREFIX: &str = "/topic/price/";

/// A stock code (e.g. `005930`), used as the topic key.
pub type StockCode = String;

/// Real-time price update for a single stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockPriceUpdate {
    /// Stock code.
    pub stock_code: StockCode,
    /// Display name.
    pub stock_name: String,
    /// Current trade price.
    pub current_price: Decimal,
    /// Absolute change from the previous close.
    pub change_price: Decimal,
    /// Percent change from the previous close.
    pub change_rate: Decimal,
    /// Accumulated volume.
    pub volume: u64,
    /// Server timestamp.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl StockPriceUpdate {
    /// Whether the price moved up from the previous close.
    #[must_use]
    pub fn is_rising(&self) -> bool {
        self.change_price.is_sign_positive() && !self.change_price.is_zero()
    }

    /// Whether the price moved down from the previous close.
    #[must_use]
    pub fn is_falling(&self) -> bool {
        self.change_price.is_sign_negative() && !self.change_price.is_zero()
    }
}

/// Build the STOMP destination for a stock code.
#[must_use]
pub fn price_destination(stock_code: &str) -> String {
    format!("{PRICE_TOPIC_PREFIX}{stock_code}")
}

/// Extract the stock code from a price destination.
///
/// Returns `None` for destinations outside the price topic namespace.
#[must_use]
pub fn stock_code_from_destination(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(PRICE_TOPIC_PREFIX)
        .filter(|code| !code.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMSUNG_JSON: &str = r#"{"stockCode":"005930","stockName":"삼성전자","currentPrice":75000,"changePrice":1500,"changeRate":2.04,"volume":25678432,"timestamp":1700000000000}"#;

    #[test]
    fn decodes_backend_payload() {
        let update: StockPriceUpdate = serde_json::from_str(SAMSUNG_JSON).unwrap();

        assert_eq!(update.stock_code, "005930");
        assert_eq!(update.stock_name, "삼성전자");
        assert_eq!(update.current_price, Decimal::new(75000, 0));
        assert_eq!(update.change_price, Decimal::new(1500, 0));
        assert_eq!(update.change_rate, Decimal::new(204, 2));
        assert_eq!(update.volume, 25_678_432);
        assert_eq!(
            update.timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
        assert!(update.is_rising());
        assert!(!update.is_falling());
    }

    #[test]
    fn missing_field_is_rejected() {
        let json = r#"{"stockCode":"005930","currentPrice":75000}"#;
        assert!(serde_json::from_str::<StockPriceUpdate>(json).is_err());
    }

    #[test]
    fn unchanged_price_is_neither_rising_nor_falling() {
        let mut update: StockPriceUpdate = serde_json::from_str(SAMSUNG_JSON).unwrap();
        update.change_price = Decimal::ZERO;

        assert!(!update.is_rising());
        assert!(!update.is_falling());
    }

    #[test]
    fn destination_round_trip() {
        let destination = price_destination("000660");
        assert_eq!(destination, "/topic/price/000660");
        assert_eq!(stock_code_from_destination(&destination), Some("000660"));
    }

    #[test]
    fn foreign_destination_has_no_stock_code() {
        assert_eq!(stock_code_from_destination("/topic/orders/1"), None);
        assert_eq!(stock_code_from_destination("/topic/price/"), None);
    }
}
