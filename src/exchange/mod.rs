// Exchange-facing plumbing: failure classification, retry/backoff, and the
// abstract API the rest of the bot talks to. No real wire protocol lives
// here; concrete clients implement [`ExchangeApi`].
pub mod classify;
pub mod paper;
pub mod retry;

pub use classify::{classify, ErrorKind};
pub use paper::PaperExchange;
pub use retry::{CallError, RetryExecutor, RetryPolicy};

use crate::models::Side;
use async_trait::async_trait;

/// Result of a filled order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub filled_size: f64,
    pub filled_price: f64,
    pub fees: f64,
}

/// Abstract remote exchange operations.
///
/// Implementations raise failures as `anyhow::Error` whose textual message is
/// sufficient for [`classify`]; no structured error codes are assumed.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Current mid price for a symbol
    async fn market_price(&self, symbol: &str) -> anyhow::Result<f64>;

    /// Submit an order and wait for the fill
    async fn place_order(&self, symbol: &str, side: Side, size: f64) -> anyhow::Result<OrderFill>;

    /// Available account balance in quote currency
    async fn account_balance(&self) -> anyhow::Result<f64>;
}
