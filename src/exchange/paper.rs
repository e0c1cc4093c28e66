//! Dry-run exchange: instant taker fills at the quoted price, no network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ExchangeApi, OrderFill};
use crate::models::Side;

const PAPER_TAKER_RATE: f64 = 0.0005;

/// In-memory exchange used for dry runs and tests. The quoted price is set
/// by whoever drives the bot (price feed, test, backtest loop).
pub struct PaperExchange {
    price: Mutex<f64>,
    balance: Mutex<f64>,
    next_order_id: AtomicU64,
}

impl PaperExchange {
    pub fn new(starting_price: f64, starting_balance: f64) -> Self {
        Self {
            price: Mutex::new(starting_price),
            balance: Mutex::new(starting_balance),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Move the quoted price, e.g. from a price feed tick
    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn market_price(&self, _symbol: &str) -> anyhow::Result<f64> {
        Ok(*self.price.lock().unwrap())
    }

    async fn place_order(&self, symbol: &str, side: Side, size: f64) -> anyhow::Result<OrderFill> {
        if size <= 0.0 {
            anyhow::bail!("invalid_symbol or size for paper order: {symbol} {size}");
        }

        let price = *self.price.lock().unwrap();
        let notional = size * price;
        let fees = notional * PAPER_TAKER_RATE;
        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            "Paper fill: {} {} {:.6} @ ${:.4} (fees ${:.6})",
            symbol,
            side,
            size,
            price,
            fees
        );

        Ok(OrderFill {
            order_id: format!("paper-{order_id}"),
            filled_size: size,
            filled_price: price,
            fees,
        })
    }

    async fn account_balance(&self) -> anyhow::Result<f64> {
        Ok(*self.balance.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fill_at_quoted_price() {
        let exchange = PaperExchange::new(100.0, 10_000.0);

        let fill = exchange.place_order("LINK", Side::Long, 5.0).await.unwrap();
        assert_eq!(fill.filled_price, 100.0);
        assert_eq!(fill.filled_size, 5.0);
        assert_eq!(fill.fees, 0.25); // 500 notional * 0.05%

        exchange.set_price(110.0);
        let fill = exchange.place_order("LINK", Side::Short, 5.0).await.unwrap();
        assert_eq!(fill.filled_price, 110.0);
    }

    #[tokio::test]
    async fn test_order_ids_unique() {
        let exchange = PaperExchange::new(100.0, 10_000.0);
        let a = exchange.place_order("LINK", Side::Long, 1.0).await.unwrap();
        let b = exchange.place_order("LINK", Side::Long, 1.0).await.unwrap();
        assert_ne!(a.order_id, b.order_id);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_size() {
        let exchange = PaperExchange::new(100.0, 10_000.0);
        assert!(exchange.place_order("LINK", Side::Long, 0.0).await.is_err());
    }
}
