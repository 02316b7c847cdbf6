use crate::core::errors::ExchangeError;
use crate::core::kernel::order_book::{BookDepth, BookMessage};
use crate::core::kernel::subscription::SubscriptionPayload;
use crate::core::types::{FundingUpdate, Instrument, Match, RiskUpdate};
use tokio_tungstenite::tungstenite::Message;

/// A channel the venue confirmed, with the instruments it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
    pub channel: String,
    pub instruments: Vec<String>,
}

/// Body of a data frame, routed by its channel tag
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Instruments(Instrument),
    Matches(Match),
    Funding(FundingUpdate),
    Risk(RiskUpdate),
    Level1(BookMessage),
    Level2(BookMessage),
    /// Data frame on a channel this codec does not know
    Unhandled { channel: String, raw: String },
}

/// Inbound frame decoded once at the boundary
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Subscribed(Vec<ChannelSubscription>),
    Unsubscribed(Vec<ChannelSubscription>),
    Rejected { message: String, reason: String },
    Data(ChannelData),
    Heartbeat,
    /// Frame whose outer type tag is not recognised
    Unrecognized { tag: String, raw: String },
}

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// Each venue implements this to translate between its wire format and the
/// venue-neutral payload and message types the session works with.
pub trait WsCodec: Send + Sync + 'static {
    /// Encode a planned (and possibly signed) payload into a WebSocket message
    fn encode_payload(&self, payload: &SubscriptionPayload) -> Result<Message, ExchangeError>;

    /// Decode a raw WebSocket message
    ///
    /// Control frames (ping, pong, close) are handled by the session and never
    /// reach the codec.
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Message was ignored/filtered by codec
    /// - `Err(error)` - Failed to decode message
    fn decode_message(&self, message: Message) -> Result<Option<StreamMessage>, ExchangeError>;

    /// Wire name of the channel carrying books of `depth`
    fn book_channel(&self, depth: BookDepth) -> &'static str;
}
