pub mod core;
pub mod exchanges;

pub use crate::core::config::ExchangeConfig;
pub use crate::core::errors::ExchangeError;
pub use crate::core::kernel::{
    ConnectionSession, EndpointRateLimiter, Nonce, OrderBookRegistry, OrderBookSynchronizer,
    SessionConfig, SessionEvent, SubscriptionPlanner, SubscriptionRequest,
};
pub use crate::core::types::*;
