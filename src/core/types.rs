use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("Invalid price: {0}")]
    InvalidPrice(#[from] rust_decimal::Error),
}

const PAIR_DELIMITERS: [char; 4] = ['-', '/', '_', ':'];

/// Type-safe symbol representation with validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    /// Create a new symbol with validation
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into();
        let quote = quote.into();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidSymbol(
                "Base and quote assets cannot be empty".to_string(),
            ));
        }

        Ok(Self { base, quote })
    }

    /// Parse a delimited pair such as `btc-usd`, `BTC/USD` or `BTC_USD`
    pub fn parse(pair: &str) -> Result<Self, TypesError> {
        let (base, quote) = pair
            .split_once(|c| PAIR_DELIMITERS.contains(&c))
            .ok_or_else(|| TypesError::InvalidSymbol(format!("no delimiter in '{}'", pair)))?;
        Self::new(base.trim(), quote.trim())
    }

    /// Render with a delimiter and casing
    pub fn format(&self, format: PairFormat) -> String {
        let rendered = format!("{}{}{}", self.base, format.delimiter, self.quote);
        if format.uppercase {
            rendered.to_uppercase()
        } else {
            rendered.to_lowercase()
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Canonical pair rendering used when building subscription payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairFormat {
    pub delimiter: &'static str,
    pub uppercase: bool,
}

impl Default for PairFormat {
    fn default() -> Self {
        Self {
            delimiter: "-",
            uppercase: true,
        }
    }
}

impl PairFormat {
    /// Canonicalise an instrument identifier.
    ///
    /// Delimited pairs are re-rendered with this format's delimiter; identifiers
    /// without a delimiter (`BTCPERP`) only have their casing normalised.
    pub fn apply(&self, instrument: &str) -> String {
        let trimmed = instrument.trim();
        Symbol::parse(trimmed).map_or_else(
            |_| {
                if self.uppercase {
                    trimmed.to_uppercase()
                } else {
                    trimmed.to_lowercase()
                }
            },
            |symbol| symbol.format(*self),
        )
    }
}

/// Type-safe price representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        Ok(Self(s.parse()?))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe quantity representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        Ok(Self(s.parse()?))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Instrument reference data pushed on the instruments channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument: String,
    pub instrument_type: Option<String>,
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub base_increment: Option<Decimal>,
    pub quote_increment: Option<Decimal>,
    pub trading_state: Option<String>,
    pub sequence: u64,
}

/// Public trade print from the matches channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub instrument: String,
    pub match_id: String,
    pub price: Price,
    pub quantity: Quantity,
    pub aggressor_side: Option<OrderSide>,
    pub sequence: u64,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingUpdate {
    pub instrument: String,
    pub funding_rate: Decimal,
    pub is_final: bool,
    pub sequence: u64,
    pub timestamp: Option<i64>,
}

/// Risk parameters (limits, index/mark/settlement prices, open interest)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskUpdate {
    pub instrument: String,
    pub limit_up: Option<Decimal>,
    pub limit_down: Option<Decimal>,
    pub index_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub settlement_price: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub sequence: u64,
    pub timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_format_canonicalises_delimiters() {
        let format = PairFormat::default();
        assert_eq!(format.apply("btc/usd"), "BTC-USD");
        assert_eq!(format.apply("eth_usdc"), "ETH-USDC");
        assert_eq!(format.apply(" BTC-PERP "), "BTC-PERP");
        assert_eq!(format.apply("btcusdt"), "BTCUSDT");
    }

    #[test]
    fn test_pair_format_lowercase() {
        let format = PairFormat {
            delimiter: "_",
            uppercase: false,
        };
        assert_eq!(format.apply("BTC-USD"), "btc_usd");
    }

    #[test]
    fn test_symbol_parse_rejects_empty_side() {
        assert!(Symbol::parse("BTC-").is_err());
        assert!(Symbol::parse("BTCUSD").is_err());
    }
}
