//! PriceFeed capability - spot prices and price history

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{CapabilityError, CapabilityOp, ServiceError};
use crate::value::Value;

pub const DEFAULT_BASE_CURRENCY: &str = "USD";
pub const DEFAULT_PERIOD: &str = "1d";

/// Timestamp the simulated feed reports for "now", in epoch milliseconds
pub const SIMULATED_TIMESTAMP_MS: i64 = 1_625_097_600_000;

/// One price observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl PricePoint {
    /// `{"price": .., "timestamp": ..}` as a guest dict
    pub fn to_value(&self) -> Value {
        let mut entries = IndexMap::with_capacity(2);
        entries.insert("price".to_string(), Value::Float(self.price));
        entries.insert("timestamp".to_string(), Value::Int(self.timestamp));
        Value::new_dict(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl PeriodUnit {
    fn millis(self) -> i64 {
        match self {
            PeriodUnit::Minutes => 60_000,
            PeriodUnit::Hours => 3_600_000,
            PeriodUnit::Days => 86_400_000,
            PeriodUnit::Weeks => 604_800_000,
        }
    }

    fn suffix(self) -> char {
        match self {
            PeriodUnit::Minutes => 'm',
            PeriodUnit::Hours => 'h',
            PeriodUnit::Days => 'd',
            PeriodUnit::Weeks => 'w',
        }
    }
}

/// A history window such as `30m`, `1h`, `7d` or `2w`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub amount: u32,
    pub unit: PeriodUnit,
}

impl Period {
    pub fn duration_ms(&self) -> i64 {
        i64::from(self.amount) * self.unit.millis()
    }
}

impl FromStr for Period {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::InvalidPeriod(s.to_string());
        let trimmed = s.trim();
        let unit = match trimmed.chars().last() {
            Some('m') => PeriodUnit::Minutes,
            Some('h') => PeriodUnit::Hours,
            Some('d') => PeriodUnit::Days,
            Some('w') => PeriodUnit::Weeks,
            _ => return Err(invalid()),
        };
        let digits = &trimmed[..trimmed.len() - 1];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u32 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }
        Ok(Period { amount, unit })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Backend for price data. Symbols and currencies arrive upper-cased.
pub trait PriceFeedClient: Send + Sync {
    fn get_price(&self, symbol: &str, base_currency: &str) -> Result<PricePoint, ServiceError>;

    /// Observations within `period` ending now, in any order
    fn get_price_history(
        &self,
        symbol: &str,
        base_currency: &str,
        period: Period,
    ) -> Result<Vec<PricePoint>, ServiceError>;
}

/// Fixed prices at a fixed instant
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedPriceFeed;

impl PriceFeedClient for SimulatedPriceFeed {
    fn get_price(&self, _symbol: &str, _base_currency: &str) -> Result<PricePoint, ServiceError> {
        Ok(PricePoint {
            price: 100.0,
            timestamp: SIMULATED_TIMESTAMP_MS,
        })
    }

    fn get_price_history(
        &self,
        _symbol: &str,
        _base_currency: &str,
        period: Period,
    ) -> Result<Vec<PricePoint>, ServiceError> {
        let span = period.duration_ms();
        let end = SIMULATED_TIMESTAMP_MS;
        Ok(vec![
            PricePoint {
                price: 100.0,
                timestamp: end - span,
            },
            PricePoint {
                price: 101.0,
                timestamp: end - span / 2,
            },
            PricePoint {
                price: 102.0,
                timestamp: end,
            },
        ])
    }
}

pub struct PriceFeedCapability<'a> {
    client: &'a dyn PriceFeedClient,
}

impl<'a> PriceFeedCapability<'a> {
    pub fn new(client: &'a dyn PriceFeedClient) -> Self {
        PriceFeedCapability { client }
    }

    pub fn get_price(&self, symbol: &str, base_currency: &str) -> Result<PricePoint, CapabilityError> {
        let op = CapabilityOp::PriceFeedGetPrice;
        let (symbol, base) = normalize_pair(symbol, base_currency).map_err(|e| CapabilityError::service(op, e))?;
        tracing::debug!(symbol = %symbol, base = %base, "price lookup");
        self.client
            .get_price(&symbol, &base)
            .map_err(|e| CapabilityError::service(op, e))
    }

    /// History ordered oldest-to-newest, whatever order the client used
    pub fn get_price_history(
        &self,
        symbol: &str,
        base_currency: &str,
        period: &str,
    ) -> Result<Vec<PricePoint>, CapabilityError> {
        let op = CapabilityOp::PriceFeedGetPriceHistory;
        let (symbol, base) = normalize_pair(symbol, base_currency).map_err(|e| CapabilityError::service(op, e))?;
        let period: Period = period.parse().map_err(|e| CapabilityError::service(op, e))?;
        tracing::debug!(symbol = %symbol, base = %base, period = %period, "price history lookup");

        let mut points = self
            .client
            .get_price_history(&symbol, &base, period)
            .map_err(|e| CapabilityError::service(op, e))?;
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

fn normalize_pair(symbol: &str, base_currency: &str) -> Result<(String, String), ServiceError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ServiceError::EmptySymbol);
    }
    let base = match base_currency.trim() {
        "" => DEFAULT_BASE_CURRENCY.to_string(),
        other => other.to_uppercase(),
    };
    Ok((symbol, base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records what it was asked and answers newest-first
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl PriceFeedClient for Recording {
        fn get_price(&self, symbol: &str, base: &str) -> Result<PricePoint, ServiceError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((symbol.to_string(), base.to_string()));
            }
            Ok(PricePoint { price: 1.0, timestamp: 0 })
        }

        fn get_price_history(&self, _: &str, _: &str, _: Period) -> Result<Vec<PricePoint>, ServiceError> {
            Ok(vec![
                PricePoint { price: 3.0, timestamp: 30 },
                PricePoint { price: 1.0, timestamp: 10 },
                PricePoint { price: 2.0, timestamp: 20 },
            ])
        }
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("1d".parse::<Period>().unwrap().duration_ms(), 86_400_000);
        assert_eq!("30m".parse::<Period>().unwrap().to_string(), "30m");
        assert_eq!("2w".parse::<Period>().unwrap().unit, PeriodUnit::Weeks);
        for bad in ["", "d", "0d", "1y", "-1d", "1.5h", "h1"] {
            assert!(bad.parse::<Period>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_simulated_spot_price() {
        let feed = PriceFeedCapability::new(&SimulatedPriceFeed);
        let point = feed.get_price("NEO", "USD").unwrap();
        assert_eq!(point, PricePoint { price: 100.0, timestamp: SIMULATED_TIMESTAMP_MS });
    }

    #[test]
    fn test_simulated_history_spans_period() {
        let feed = PriceFeedCapability::new(&SimulatedPriceFeed);
        let points = feed.get_price_history("NEO", "USD", "1h").unwrap();
        let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![100.0, 101.0, 102.0]);
        assert_eq!(points[0].timestamp, SIMULATED_TIMESTAMP_MS - 3_600_000);
        assert_eq!(points[1].timestamp, SIMULATED_TIMESTAMP_MS - 1_800_000);
        assert_eq!(points[2].timestamp, SIMULATED_TIMESTAMP_MS);
    }

    #[test]
    fn test_history_sorted_oldest_first() {
        let client = Recording::default();
        let feed = PriceFeedCapability::new(&client);
        let points = feed.get_price_history("gas", "usd", "1d").unwrap();
        let stamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
    }

    #[test]
    fn test_symbols_upper_cased() {
        let client = Recording::default();
        let feed = PriceFeedCapability::new(&client);
        feed.get_price(" neo ", "eur").unwrap();
        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0], ("NEO".to_string(), "EUR".to_string()));
    }

    #[test]
    fn test_invalid_inputs() {
        let feed = PriceFeedCapability::new(&SimulatedPriceFeed);
        let err = feed.get_price("", "USD").unwrap_err();
        assert_eq!(err.to_string(), "price_feed.get_price: symbol must not be empty");
        let err = feed.get_price_history("NEO", "USD", "1y").unwrap_err();
        assert!(err.to_string().contains("invalid period '1y'"));
    }
}
