use crate::core::kernel::subscription::Operation;
use crate::core::types::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outbound SUBSCRIBE / UNSUBSCRIBE frame
#[derive(Debug, Clone, Serialize)]
pub struct IntxRequest {
    #[serde(rename = "type")]
    pub operation: Operation,
    pub product_ids: Vec<String>,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Outer tags shared by every inbound frame
#[derive(Debug, Deserialize)]
pub struct IntxEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntxChannelAck {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Acknowledgement of a SUBSCRIBE or UNSUBSCRIBE
#[derive(Debug, Deserialize)]
pub struct IntxSubscriptions {
    #[serde(default)]
    pub channels: Vec<IntxChannelAck>,
    #[serde(default)]
    pub authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub struct IntxReject {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

/// LEVEL2 snapshot (`bids`/`asks`) or update (`changes`)
#[derive(Debug, Deserialize)]
pub struct IntxLevel2 {
    pub product_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub bids: Vec<(Price, Quantity)>,
    #[serde(default)]
    pub asks: Vec<(Price, Quantity)>,
    /// `[side, price, size]`
    #[serde(default)]
    pub changes: Vec<(String, Price, Quantity)>,
}

#[derive(Debug, Deserialize)]
pub struct IntxLevel1 {
    pub product_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bid_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bid_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ask_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ask_qty: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct IntxInstrument {
    pub product_id: String,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default)]
    pub base_asset_name: Option<String>,
    #[serde(default)]
    pub quote_asset_name: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub base_increment: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub quote_increment: Option<Decimal>,
    #[serde(default)]
    pub trading_state: Option<String>,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Deserialize)]
pub struct IntxMatch {
    pub product_id: String,
    pub match_id: String,
    pub trade_price: Price,
    pub trade_qty: Quantity,
    #[serde(default)]
    pub aggressor_side: Option<String>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntxFunding {
    pub product_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub funding_rate: Decimal,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntxRisk {
    pub product_id: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub limit_up: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub limit_down: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub index_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub settlement_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub open_interest: Option<Decimal>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub time: Option<String>,
}
