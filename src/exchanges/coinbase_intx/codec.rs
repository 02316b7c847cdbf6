use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{ChannelData, ChannelSubscription, StreamMessage, WsCodec};
use crate::core::kernel::order_book::{
    BookDepth, BookMessage, BookSide, LevelChange, OrderBookSnapshot, OrderBookUpdate, PriceLevel,
    UpdateAction,
};
use crate::core::kernel::subscription::SubscriptionPayload;
use crate::core::types::{FundingUpdate, Instrument, Match, OrderSide, Price, Quantity, RiskUpdate};
use crate::exchanges::coinbase_intx::types::{
    IntxEnvelope, IntxFunding, IntxInstrument, IntxLevel1, IntxLevel2, IntxMatch, IntxReject,
    IntxRequest, IntxRisk, IntxSubscriptions,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

pub const INSTRUMENTS: &str = "INSTRUMENTS";
pub const MATCH: &str = "MATCH";
pub const FUNDING: &str = "FUNDING";
pub const RISK: &str = "RISK";
pub const LEVEL1: &str = "LEVEL1";
pub const LEVEL2: &str = "LEVEL2";
const HEARTBEATS: &str = "HEARTBEATS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Snapshot,
    Update,
}

/// Coinbase International market data codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinbaseIntxCodec;

impl CoinbaseIntxCodec {
    pub fn new() -> Self {
        Self
    }

    fn parse<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, ExchangeError> {
        T::deserialize(value)
            .map_err(|e| ExchangeError::ParseError(format!("Malformed {} frame: {}", what, e)))
    }

    fn decode_data(
        &self,
        kind: FrameKind,
        channel: String,
        value: &Value,
        raw: String,
    ) -> Result<ChannelData, ExchangeError> {
        let data = match channel.as_str() {
            LEVEL2 => ChannelData::Level2(Self::level2(kind, Self::parse(value, LEVEL2)?)?),
            LEVEL1 => ChannelData::Level1(Self::level1(kind, Self::parse(value, LEVEL1)?)),
            INSTRUMENTS => {
                let wire: IntxInstrument = Self::parse(value, INSTRUMENTS)?;
                ChannelData::Instruments(Instrument {
                    instrument: wire.product_id,
                    instrument_type: wire.instrument_type,
                    base_asset: wire.base_asset_name,
                    quote_asset: wire.quote_asset_name,
                    base_increment: wire.base_increment,
                    quote_increment: wire.quote_increment,
                    trading_state: wire.trading_state,
                    sequence: wire.sequence,
                })
            }
            MATCH => {
                let wire: IntxMatch = Self::parse(value, MATCH)?;
                ChannelData::Matches(Match {
                    instrument: wire.product_id,
                    match_id: wire.match_id,
                    price: wire.trade_price,
                    quantity: wire.trade_qty,
                    aggressor_side: wire.aggressor_side.as_deref().and_then(order_side),
                    sequence: wire.sequence,
                    timestamp: timestamp_ms(wire.time.as_deref()),
                })
            }
            FUNDING => {
                let wire: IntxFunding = Self::parse(value, FUNDING)?;
                ChannelData::Funding(FundingUpdate {
                    instrument: wire.product_id,
                    funding_rate: wire.funding_rate,
                    is_final: wire.is_final,
                    sequence: wire.sequence,
                    timestamp: timestamp_ms(wire.time.as_deref()),
                })
            }
            RISK => {
                let wire: IntxRisk = Self::parse(value, RISK)?;
                ChannelData::Risk(RiskUpdate {
                    instrument: wire.product_id,
                    limit_up: wire.limit_up,
                    limit_down: wire.limit_down,
                    index_price: wire.index_price,
                    mark_price: wire.mark_price,
                    settlement_price: wire.settlement_price,
                    open_interest: wire.open_interest,
                    sequence: wire.sequence,
                    timestamp: timestamp_ms(wire.time.as_deref()),
                })
            }
            _ => return Ok(ChannelData::Unhandled { channel, raw }),
        };
        Ok(data)
    }

    fn level2(kind: FrameKind, wire: IntxLevel2) -> Result<BookMessage, ExchangeError> {
        let timestamp = timestamp_ms(wire.time.as_deref());
        let levels = |levels: Vec<(Price, Quantity)>| {
            levels
                .into_iter()
                .map(|(price, size)| PriceLevel { price, size })
                .collect::<Vec<_>>()
        };

        match kind {
            FrameKind::Snapshot => Ok(BookMessage::Snapshot(OrderBookSnapshot {
                instrument: wire.product_id,
                sequence: wire.sequence,
                bids: levels(wire.bids),
                asks: levels(wire.asks),
                timestamp,
            })),
            FrameKind::Update => {
                let changes = wire
                    .changes
                    .into_iter()
                    .map(|(side, price, size)| {
                        book_side(&side)
                            .map(|side| LevelChange { side, price, size })
                            .ok_or_else(|| {
                                ExchangeError::ParseError(format!("Unknown book side: {}", side))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(BookMessage::Update(OrderBookUpdate {
                    instrument: wire.product_id,
                    sequence: wire.sequence,
                    action: UpdateAction::Merge,
                    changes,
                    timestamp,
                }))
            }
        }
    }

    /// Top of book arrives whole on both frame kinds
    fn level1(kind: FrameKind, wire: IntxLevel1) -> BookMessage {
        let top = |price: Option<_>, size: Option<_>| match (price, size) {
            (Some(price), Some(size)) => Some(PriceLevel {
                price: Price::new(price),
                size: Quantity::new(size),
            }),
            _ => None,
        };
        let bid = top(wire.bid_price, wire.bid_qty);
        let ask = top(wire.ask_price, wire.ask_qty);
        let timestamp = timestamp_ms(wire.time.as_deref());

        match kind {
            FrameKind::Snapshot => BookMessage::Snapshot(OrderBookSnapshot {
                instrument: wire.product_id,
                sequence: wire.sequence,
                bids: bid.into_iter().collect(),
                asks: ask.into_iter().collect(),
                timestamp,
            }),
            FrameKind::Update => {
                let changes = bid
                    .map(|level| (BookSide::Bid, level))
                    .into_iter()
                    .chain(ask.map(|level| (BookSide::Ask, level)))
                    .map(|(side, level)| LevelChange {
                        side,
                        price: level.price,
                        size: level.size,
                    })
                    .collect();

                BookMessage::Update(OrderBookUpdate {
                    instrument: wire.product_id,
                    sequence: wire.sequence,
                    action: UpdateAction::ReplaceTop,
                    changes,
                    timestamp,
                })
            }
        }
    }
}

fn acks(value: &Value) -> Result<Vec<ChannelSubscription>, ExchangeError> {
    let wire: IntxSubscriptions = CoinbaseIntxCodec::parse(value, "subscription ack")?;
    Ok(wire
        .channels
        .into_iter()
        .map(|ack| ChannelSubscription {
            channel: ack.name,
            instruments: ack.product_ids,
        })
        .collect())
}

fn book_side(side: &str) -> Option<BookSide> {
    match side.to_ascii_uppercase().as_str() {
        "BUY" | "BID" => Some(BookSide::Bid),
        "SELL" | "OFFER" | "ASK" => Some(BookSide::Ask),
        _ => None,
    }
}

fn order_side(side: &str) -> Option<OrderSide> {
    match side.to_ascii_uppercase().as_str() {
        "BUY" => Some(OrderSide::Buy),
        "SELL" => Some(OrderSide::Sell),
        _ => None,
    }
}

fn timestamp_ms(time: Option<&str>) -> Option<i64> {
    time.and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
}

impl WsCodec for CoinbaseIntxCodec {
    fn encode_payload(&self, payload: &SubscriptionPayload) -> Result<Message, ExchangeError> {
        let auth = payload.auth.as_ref();
        let request = IntxRequest {
            operation: payload.operation,
            product_ids: payload.instruments.clone(),
            channels: payload.channels.clone(),
            time: auth.map(|a| a.timestamp.clone()),
            key: auth.map(|a| a.key.clone()),
            passphrase: auth.map(|a| a.passphrase.clone()),
            signature: auth.map(|a| a.signature.clone()),
        };

        Ok(Message::Text(serde_json::to_string(&request)?))
    }

    fn decode_message(&self, message: Message) -> Result<Option<StreamMessage>, ExchangeError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                ExchangeError::ParseError(format!("Invalid UTF-8 in binary message: {}", e))
            })?,
            _ => return Ok(None),
        };

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::ParseError(format!("Failed to parse JSON: {}", e)))?;
        let envelope: IntxEnvelope = Self::parse(&value, "message")?;

        let kind = match envelope.message_type.as_str() {
            "SUBSCRIBE" => return Ok(Some(StreamMessage::Subscribed(acks(&value)?))),
            "UNSUBSCRIBE" => return Ok(Some(StreamMessage::Unsubscribed(acks(&value)?))),
            "REJECT" => {
                let reject: IntxReject = Self::parse(&value, "REJECT")?;
                return Ok(Some(StreamMessage::Rejected {
                    message: reject.message,
                    reason: reject.reason,
                }));
            }
            "SNAPSHOT" => FrameKind::Snapshot,
            "UPDATE" => FrameKind::Update,
            _ => {
                return Ok(Some(StreamMessage::Unrecognized {
                    tag: envelope.message_type,
                    raw: text,
                }))
            }
        };

        let channel = envelope.channel.ok_or_else(|| {
            ExchangeError::ParseError(format!("Data frame without channel: {}", text))
        })?;
        if channel == HEARTBEATS {
            return Ok(Some(StreamMessage::Heartbeat));
        }

        let data = self.decode_data(kind, channel, &value, text)?;
        Ok(Some(StreamMessage::Data(data)))
    }

    fn book_channel(&self, depth: BookDepth) -> &'static str {
        match depth {
            BookDepth::Level1 => LEVEL1,
            BookDepth::Level2 => LEVEL2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::subscription::{Operation, PayloadAuth};
    use rust_decimal_macros::dec;

    fn decode(text: &str) -> StreamMessage {
        CoinbaseIntxCodec::new()
            .decode_message(Message::Text(text.to_string()))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_unsigned_subscribe_has_no_auth_fields() {
        let payload = SubscriptionPayload {
            operation: Operation::Subscribe,
            channels: vec![LEVEL2.to_string()],
            instruments: vec!["BTC-PERP".to_string()],
            auth: None,
        };

        let Message::Text(text) = CoinbaseIntxCodec::new().encode_payload(&payload).unwrap() else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "SUBSCRIBE");
        assert_eq!(value["channels"], serde_json::json!(["LEVEL2"]));
        assert_eq!(value["product_ids"], serde_json::json!(["BTC-PERP"]));
        assert!(value.get("signature").is_none());
        assert!(value.get("time").is_none());
    }

    #[test]
    fn test_signed_unsubscribe_carries_auth_fields() {
        let payload = SubscriptionPayload {
            operation: Operation::Unsubscribe,
            channels: vec![MATCH.to_string()],
            instruments: vec!["ETH-PERP".to_string()],
            auth: Some(PayloadAuth {
                key: "key".to_string(),
                passphrase: "phrase".to_string(),
                signature: "c2ln".to_string(),
                timestamp: "1700000000".to_string(),
            }),
        };

        let Message::Text(text) = CoinbaseIntxCodec::new().encode_payload(&payload).unwrap() else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "UNSUBSCRIBE");
        assert_eq!(value["key"], "key");
        assert_eq!(value["passphrase"], "phrase");
        assert_eq!(value["signature"], "c2ln");
        assert_eq!(value["time"], "1700000000");
    }

    #[test]
    fn test_decode_subscription_ack() {
        let message = decode(
            r#"{"type":"SUBSCRIBE","channels":[{"name":"LEVEL2","product_ids":["BTC-PERP"]}],"authenticated":false}"#,
        );
        assert_eq!(
            message,
            StreamMessage::Subscribed(vec![ChannelSubscription {
                channel: "LEVEL2".to_string(),
                instruments: vec!["BTC-PERP".to_string()],
            }])
        );
    }

    #[test]
    fn test_decode_reject() {
        let message = decode(
            r#"{"type":"REJECT","message":"failed to subscribe","reason":"invalid product","channel":"SUBSCRIPTIONS"}"#,
        );
        assert_eq!(
            message,
            StreamMessage::Rejected {
                message: "failed to subscribe".to_string(),
                reason: "invalid product".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_level2_snapshot_and_update() {
        let snapshot = decode(
            r#"{"type":"SNAPSHOT","channel":"LEVEL2","product_id":"BTC-PERP","sequence":5,"time":"2023-05-01T12:00:00.000Z","bids":[["29000.5","1.5"]],"asks":[["29001.0","2"]]}"#,
        );
        let StreamMessage::Data(ChannelData::Level2(BookMessage::Snapshot(snapshot))) = snapshot
        else {
            panic!("expected level2 snapshot");
        };
        assert_eq!(snapshot.sequence, 5);
        assert_eq!(snapshot.bids[0].price, Price::new(dec!(29000.5)));
        assert_eq!(snapshot.asks[0].size, Quantity::new(dec!(2)));
        assert_eq!(snapshot.timestamp, Some(1_682_942_400_000));

        let update = decode(
            r#"{"type":"UPDATE","channel":"LEVEL2","product_id":"BTC-PERP","sequence":6,"changes":[["BUY","29000.5","0"],["SELL","29002","1"]]}"#,
        );
        let StreamMessage::Data(ChannelData::Level2(BookMessage::Update(update))) = update else {
            panic!("expected level2 update");
        };
        assert_eq!(update.action, UpdateAction::Merge);
        assert_eq!(update.changes.len(), 2);
        assert_eq!(update.changes[0].side, BookSide::Bid);
        assert!(update.changes[0].size.is_zero());
        assert_eq!(update.changes[1].side, BookSide::Ask);
    }

    #[test]
    fn test_decode_level1_update_replaces_top() {
        let message = decode(
            r#"{"type":"UPDATE","channel":"LEVEL1","product_id":"BTC-PERP","sequence":3,"bid_price":"100","bid_qty":"1","ask_price":"101","ask_qty":"2"}"#,
        );
        let StreamMessage::Data(ChannelData::Level1(BookMessage::Update(update))) = message else {
            panic!("expected level1 update");
        };
        assert_eq!(update.action, UpdateAction::ReplaceTop);
        assert_eq!(update.changes.len(), 2);
    }

    #[test]
    fn test_decode_match_and_funding() {
        let message = decode(
            r#"{"type":"UPDATE","channel":"MATCH","product_id":"ETH-PERP","match_id":"374","trade_price":"1800.5","trade_qty":"0.1","aggressor_side":"SELL","sequence":9}"#,
        );
        let StreamMessage::Data(ChannelData::Matches(trade)) = message else {
            panic!("expected match");
        };
        assert_eq!(trade.aggressor_side, Some(OrderSide::Sell));
        assert_eq!(trade.price, Price::new(dec!(1800.5)));

        let message = decode(
            r#"{"type":"UPDATE","channel":"FUNDING","product_id":"ETH-PERP","funding_rate":"0.0001","is_final":true,"sequence":2}"#,
        );
        let StreamMessage::Data(ChannelData::Funding(funding)) = message else {
            panic!("expected funding");
        };
        assert!(funding.is_final);
        assert_eq!(funding.funding_rate, dec!(0.0001));
    }

    #[test]
    fn test_unknown_channel_and_tag() {
        let raw = r#"{"type":"UPDATE","channel":"CANDLES","product_id":"BTC-PERP"}"#;
        assert_eq!(
            decode(raw),
            StreamMessage::Data(ChannelData::Unhandled {
                channel: "CANDLES".to_string(),
                raw: raw.to_string(),
            })
        );

        let raw = r#"{"type":"MAINTENANCE","channel":"STATUS"}"#;
        assert_eq!(
            decode(raw),
            StreamMessage::Unrecognized {
                tag: "MAINTENANCE".to_string(),
                raw: raw.to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        let result = CoinbaseIntxCodec::new().decode_message(Message::Text("{not json".to_string()));
        assert!(matches!(result, Err(ExchangeError::ParseError(_))));

        let result = CoinbaseIntxCodec::new().decode_message(Message::Text(
            r#"{"type":"UPDATE","channel":"LEVEL2","product_id":"BTC-PERP","sequence":1,"changes":[["UP","1","1"]]}"#
                .to_string(),
        ));
        assert!(matches!(result, Err(ExchangeError::ParseError(_))));
    }
}
