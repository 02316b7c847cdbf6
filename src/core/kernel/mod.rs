/// `LotusX` Kernel - venue-neutral connectivity substrate
///
/// Everything a venue adapter needs to talk to an exchange, with no
/// venue-specific wire knowledge. Adapters supply a codec and a signer.
///
/// # Architecture
///
/// ## Request discipline
/// - `Nonce`: strictly increasing request nonces, safe under concurrency
/// - `EndpointRateLimiter`: one token bucket per endpoint class
///
/// ## Streaming
/// - `SubscriptionPlanner`: batches channel requests into minimal payloads
/// - `ConnectionSession`: one socket, one writer task, one read loop
/// - `OrderBookSynchronizer`: snapshot + sequenced updates into live books
///
/// ## Transport and authentication
/// - `WsTransport`: dial a socket, split into writer and reader halves
/// - `WsCodec`: venue wire format in and out
/// - `Signer` / `PayloadSigner`: REST request and subscription payload signing
/// - `ReqwestRest`: rate-limited, signed REST client
///
/// # Usage
///
/// ```rust,no_run
/// use lotusx_core::core::config::ExchangeConfig;
/// use lotusx_core::core::kernel::*;
/// use lotusx_core::exchanges::coinbase_intx;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExchangeConfig::read_only();
/// let transport = TungsteniteWs::new(coinbase_intx::WS_URL.to_string());
/// let mut session = coinbase_intx::build_session(&config, transport)?;
/// let mut events = session.take_events().expect("events taken once");
///
/// session
///     .connect(&[SubscriptionRequest::subscribe("LEVEL2", &["BTC-PERP"])])
///     .await?;
///
/// while let Some(event) = events.recv().await {
///     if let SessionEvent::BookUpdated { key, .. } = event {
///         let book = session.order_books().get(&key);
///         println!("{:?}", book.and_then(|b| b.best_bid()));
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod nonce;
pub mod order_book;
pub mod rate_limit;
pub mod rest;
pub mod session;
pub mod signer;
pub mod subscription;
pub mod ws;

// Re-export key types for convenience
pub use codec::{ChannelData, ChannelSubscription, StreamMessage, WsCodec};
pub use nonce::{Nonce, SeedPolicy};
pub use order_book::{
    ApplyOutcome, BookDepth, BookKey, BookMessage, BookSide, LevelChange, OrderBook,
    OrderBookRegistry, OrderBookSnapshot, OrderBookSynchronizer, OrderBookUpdate, PriceLevel,
    UpdateAction,
};
pub use rate_limit::{EndpointClass, EndpointRateLimiter, RateLimitRule};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
pub use session::{ConnectionSession, SessionConfig, SessionEvent, SessionState};
pub use signer::{
    HmacPayloadSigner, NonceHmacSigner, PayloadSigner, SignatureEncoding, SignatureResult, Signer,
    TimestampFormat,
};
pub use subscription::{
    Operation, PayloadAuth, SubscriptionPayload, SubscriptionPlanner, SubscriptionRequest,
};
pub use ws::{TungsteniteWs, WsConfig, WsReader, WsTransport, WsWriter};
