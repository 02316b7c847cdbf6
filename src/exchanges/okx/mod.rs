pub mod rate_limits;
pub mod signer;

use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::rate_limit::EndpointRateLimiter;
use crate::core::kernel::rest::{ReqwestRest, RestClientBuilder, RestClientConfig};
use std::sync::Arc;

pub use rate_limits::OkxEndpoint;
pub use signer::OkxSigner;

pub const VENUE: &str = "okx";
pub const BASE_URL: &str = "https://www.okx.com";

/// REST client charged against the OKX endpoint table.
///
/// Pass the same `limiter` to every client sharing one credential set so
/// they draw from the same buckets.
pub fn build_rest_client(
    config: &ExchangeConfig,
    limiter: Option<Arc<EndpointRateLimiter<OkxEndpoint>>>,
) -> Result<ReqwestRest<OkxEndpoint>, ExchangeError> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| BASE_URL.to_string());
    let mut builder = RestClientBuilder::new(RestClientConfig::new(base_url, VENUE.to_string()));

    if config.has_credentials() {
        builder = builder.with_signer(Arc::new(OkxSigner::from_config(config)?));
    }
    if let Some(limiter) = limiter {
        builder = builder.with_rate_limiter(limiter);
    }

    builder.build()
}
