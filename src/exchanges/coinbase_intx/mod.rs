pub mod codec;
pub mod signer;
pub mod types;

use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::session::{ConnectionSession, SessionConfig};
use crate::core::kernel::ws::{TungsteniteWs, WsTransport};
use std::sync::Arc;

pub use codec::CoinbaseIntxCodec;

pub const VENUE: &str = "coinbase_intx";
pub const WS_URL: &str = "wss://ws-md.international.coinbase.com";
pub const SANDBOX_WS_URL: &str = "wss://ws-md.n5e2.coinbase.com";

/// Market data endpoint for `config`, honouring an explicit override
pub fn ws_url(config: &ExchangeConfig) -> String {
    config.ws_url.clone().unwrap_or_else(|| {
        if config.testnet {
            SANDBOX_WS_URL.to_string()
        } else {
            WS_URL.to_string()
        }
    })
}

/// Build a session over `transport`; frames are signed when the config
/// enables authenticated endpoints and carries credentials.
pub fn build_session<T: WsTransport>(
    config: &ExchangeConfig,
    transport: T,
) -> Result<ConnectionSession<T, CoinbaseIntxCodec>, ExchangeError> {
    build_session_with(config, transport, SessionConfig::default())
}

pub fn build_session_with<T: WsTransport>(
    config: &ExchangeConfig,
    transport: T,
    session_config: SessionConfig,
) -> Result<ConnectionSession<T, CoinbaseIntxCodec>, ExchangeError> {
    let authenticate = config.should_authenticate();
    let session_config = SessionConfig {
        authenticate,
        ..session_config
    };

    let session = ConnectionSession::new(VENUE, transport, CoinbaseIntxCodec::new(), session_config);
    if authenticate {
        Ok(session.with_signer(Arc::new(signer::ws_signer(config)?)))
    } else {
        Ok(session)
    }
}

/// Session over a real socket to the configured endpoint
pub fn connect_session(
    config: &ExchangeConfig,
) -> Result<ConnectionSession<TungsteniteWs, CoinbaseIntxCodec>, ExchangeError> {
    build_session(config, TungsteniteWs::new(ws_url(config)))
}
