use crate::core::kernel::rate_limit::{EndpointClass, RateLimitRule};
use nonzero_ext::nonzero;
use std::time::Duration;

const TWO_SECONDS: Duration = Duration::from_secs(2);

/// OKX v5 REST endpoint classes, each with its published limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OkxEndpoint {
    // Trade
    PlaceOrder,
    PlaceBatchOrders,
    CancelOrder,
    CancelBatchOrders,
    AmendOrder,
    AmendBatchOrders,
    ClosePosition,
    GetOrder,
    GetPendingOrders,
    GetOrderHistory,
    GetOrderHistoryArchive,
    GetFills,
    GetFillsHistory,
    PlaceAlgoOrder,
    CancelAlgoOrders,
    GetPendingAlgoOrders,
    MassCancel,
    CancelAllAfter,
    // Account
    GetBalance,
    GetPositions,
    GetPositionsHistory,
    GetAccountConfig,
    SetLeverage,
    GetLeverage,
    GetMaxOrderSize,
    GetMaxAvailableSize,
    GetFeeRates,
    GetBills,
    GetBillsArchive,
    // Market
    GetTickers,
    GetTicker,
    GetOrderBook,
    GetCandles,
    GetHistoryCandles,
    GetTrades,
    GetHistoryTrades,
    // Public
    GetInstruments,
    GetFundingRate,
    GetFundingRateHistory,
    GetOpenInterest,
    GetMarkPrice,
    GetPriceLimit,
    GetSystemTime,
    GetSystemStatus,
}

impl OkxEndpoint {
    /// Request path the class covers
    pub const fn path(self) -> &'static str {
        match self {
            Self::PlaceOrder => "/api/v5/trade/order",
            Self::PlaceBatchOrders => "/api/v5/trade/batch-orders",
            Self::CancelOrder => "/api/v5/trade/cancel-order",
            Self::CancelBatchOrders => "/api/v5/trade/cancel-batch-orders",
            Self::AmendOrder => "/api/v5/trade/amend-order",
            Self::AmendBatchOrders => "/api/v5/trade/amend-batch-orders",
            Self::ClosePosition => "/api/v5/trade/close-position",
            Self::GetOrder => "/api/v5/trade/order",
            Self::GetPendingOrders => "/api/v5/trade/orders-pending",
            Self::GetOrderHistory => "/api/v5/trade/orders-history",
            Self::GetOrderHistoryArchive => "/api/v5/trade/orders-history-archive",
            Self::GetFills => "/api/v5/trade/fills",
            Self::GetFillsHistory => "/api/v5/trade/fills-history",
            Self::PlaceAlgoOrder => "/api/v5/trade/order-algo",
            Self::CancelAlgoOrders => "/api/v5/trade/cancel-algos",
            Self::GetPendingAlgoOrders => "/api/v5/trade/orders-algo-pending",
            Self::MassCancel => "/api/v5/trade/mass-cancel",
            Self::CancelAllAfter => "/api/v5/trade/cancel-all-after",
            Self::GetBalance => "/api/v5/account/balance",
            Self::GetPositions => "/api/v5/account/positions",
            Self::GetPositionsHistory => "/api/v5/account/positions-history",
            Self::GetAccountConfig => "/api/v5/account/config",
            Self::SetLeverage => "/api/v5/account/set-leverage",
            Self::GetLeverage => "/api/v5/account/leverage-info",
            Self::GetMaxOrderSize => "/api/v5/account/max-size",
            Self::GetMaxAvailableSize => "/api/v5/account/max-avail-size",
            Self::GetFeeRates => "/api/v5/account/trade-fee",
            Self::GetBills => "/api/v5/account/bills",
            Self::GetBillsArchive => "/api/v5/account/bills-archive",
            Self::GetTickers => "/api/v5/market/tickers",
            Self::GetTicker => "/api/v5/market/ticker",
            Self::GetOrderBook => "/api/v5/market/books",
            Self::GetCandles => "/api/v5/market/candles",
            Self::GetHistoryCandles => "/api/v5/market/history-candles",
            Self::GetTrades => "/api/v5/market/trades",
            Self::GetHistoryTrades => "/api/v5/market/history-trades",
            Self::GetInstruments => "/api/v5/public/instruments",
            Self::GetFundingRate => "/api/v5/public/funding-rate",
            Self::GetFundingRateHistory => "/api/v5/public/funding-rate-history",
            Self::GetOpenInterest => "/api/v5/public/open-interest",
            Self::GetMarkPrice => "/api/v5/public/mark-price",
            Self::GetPriceLimit => "/api/v5/public/price-limit",
            Self::GetSystemTime => "/api/v5/public/time",
            Self::GetSystemStatus => "/api/v5/system/status",
        }
    }
}

impl EndpointClass for OkxEndpoint {
    fn all() -> &'static [Self] {
        &[
            Self::PlaceOrder,
            Self::PlaceBatchOrders,
            Self::CancelOrder,
            Self::CancelBatchOrders,
            Self::AmendOrder,
            Self::AmendBatchOrders,
            Self::ClosePosition,
            Self::GetOrder,
            Self::GetPendingOrders,
            Self::GetOrderHistory,
            Self::GetOrderHistoryArchive,
            Self::GetFills,
            Self::GetFillsHistory,
            Self::PlaceAlgoOrder,
            Self::CancelAlgoOrders,
            Self::GetPendingAlgoOrders,
            Self::MassCancel,
            Self::CancelAllAfter,
            Self::GetBalance,
            Self::GetPositions,
            Self::GetPositionsHistory,
            Self::GetAccountConfig,
            Self::SetLeverage,
            Self::GetLeverage,
            Self::GetMaxOrderSize,
            Self::GetMaxAvailableSize,
            Self::GetFeeRates,
            Self::GetBills,
            Self::GetBillsArchive,
            Self::GetTickers,
            Self::GetTicker,
            Self::GetOrderBook,
            Self::GetCandles,
            Self::GetHistoryCandles,
            Self::GetTrades,
            Self::GetHistoryTrades,
            Self::GetInstruments,
            Self::GetFundingRate,
            Self::GetFundingRateHistory,
            Self::GetOpenInterest,
            Self::GetMarkPrice,
            Self::GetPriceLimit,
            Self::GetSystemTime,
            Self::GetSystemStatus,
        ]
    }

    fn rule(self) -> RateLimitRule {
        match self {
            Self::PlaceBatchOrders | Self::CancelBatchOrders | Self::AmendBatchOrders => {
                RateLimitRule::new(TWO_SECONDS, nonzero!(300u32))
            }
            Self::PlaceOrder
            | Self::CancelOrder
            | Self::AmendOrder
            | Self::GetOrder
            | Self::GetPendingOrders
            | Self::GetFills => RateLimitRule::new(TWO_SECONDS, nonzero!(60u32)),
            Self::GetOrderHistory | Self::GetOrderBook | Self::GetCandles => {
                RateLimitRule::new(TWO_SECONDS, nonzero!(40u32))
            }
            Self::GetTrades => RateLimitRule::new(TWO_SECONDS, nonzero!(100u32)),
            Self::ClosePosition
            | Self::GetOrderHistoryArchive
            | Self::PlaceAlgoOrder
            | Self::CancelAlgoOrders
            | Self::GetPendingAlgoOrders
            | Self::SetLeverage
            | Self::GetLeverage
            | Self::GetMaxOrderSize
            | Self::GetMaxAvailableSize
            | Self::GetTickers
            | Self::GetTicker
            | Self::GetHistoryCandles
            | Self::GetHistoryTrades
            | Self::GetInstruments
            | Self::GetFundingRate
            | Self::GetOpenInterest
            | Self::GetPriceLimit => RateLimitRule::new(TWO_SECONDS, nonzero!(20u32)),
            Self::GetFillsHistory
            | Self::GetBalance
            | Self::GetPositions
            | Self::GetFundingRateHistory
            | Self::GetMarkPrice
            | Self::GetSystemTime => RateLimitRule::new(TWO_SECONDS, nonzero!(10u32)),
            Self::MassCancel | Self::GetAccountConfig | Self::GetFeeRates | Self::GetBillsArchive => {
                RateLimitRule::new(TWO_SECONDS, nonzero!(5u32))
            }
            Self::GetBills => RateLimitRule::new(Duration::from_secs(1), nonzero!(5u32)),
            Self::CancelAllAfter => RateLimitRule::new(Duration::from_secs(1), nonzero!(1u32)),
            Self::GetPositionsHistory => {
                RateLimitRule::new(Duration::from_secs(10), nonzero!(1u32))
            }
            Self::GetSystemStatus => RateLimitRule::new(Duration::from_secs(5), nonzero!(1u32)),
        }
    }
}
