//! Trading cycle execution.
//!
//! The engine owns no strategy: it is handed a signal and the current price
//! and runs one cycle of the execution pipeline — circuit breaker gate, stop
//! loss, position sizing, fee viability, retried order placement, and state
//! persistence. Remote failures are recorded and survived; state persistence
//! failures are fatal and bubble out.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;

use crate::config::Settings;
use crate::exchange::{CallError, ErrorKind, ExchangeApi, OrderFill, RetryExecutor};
use crate::fees::FeeGate;
use crate::models::{Position, Side, Signal, Trade};
use crate::monitor::{ErrorMonitor, Severity};
use crate::state::{StateError, StateStore};

/// Exchange-imposed floor on order notional, in USD
const MIN_NOTIONAL_USD: f64 = 10.0;

/// What a trading cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Circuit breaker active, nothing attempted
    Halted,
    /// Signal did not apply to the current position state
    NoAction,
    /// Entry blocked because fees would eat the expected profit
    FeeFiltered,
    Opened { size: f64, price: f64 },
    Closed { pnl: f64, roi: f64 },
    /// A remote call failed after classification-aware retrying
    Failed { kind: ErrorKind },
}

/// Single-position long-only execution engine
pub struct TradingEngine {
    settings: Settings,
    exchange: Arc<dyn ExchangeApi>,
    executor: RetryExecutor,
    fee_gate: FeeGate,
    monitor: Arc<ErrorMonitor>,
    store: Arc<StateStore>,
}

impl TradingEngine {
    pub fn new(
        settings: Settings,
        exchange: Arc<dyn ExchangeApi>,
        executor: RetryExecutor,
        fee_gate: FeeGate,
        monitor: Arc<ErrorMonitor>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            settings,
            exchange,
            executor,
            fee_gate,
            monitor,
            store,
        }
    }

    /// Run one trading cycle for `signal` at the current `price`.
    ///
    /// Only [`StateError`] is returned as `Err`; every remote failure is
    /// recorded in the error monitor and reported as a [`CycleOutcome`].
    pub async fn run_cycle(
        &self,
        signal: Signal,
        price: f64,
    ) -> Result<CycleOutcome, StateError> {
        if self.monitor.is_active() {
            tracing::warn!("Circuit breaker active, skipping trading cycle");
            return Ok(CycleOutcome::Halted);
        }

        let position = self.store.current_position();

        // Stop loss overrides whatever the signal says
        if let Some(pos) = &position {
            let stop_price = pos.entry_price * (1.0 - self.settings.stop_loss_percent / 100.0);
            if price <= stop_price {
                tracing::warn!(
                    "Stop loss triggered at ${:.4} (entry ${:.4}, stop ${:.4})",
                    price,
                    pos.entry_price,
                    stop_price
                );
                return self.close_position(pos.clone()).await;
            }
        }

        match (signal, &position) {
            (Signal::Buy, None) => self.open_position(price).await,
            (Signal::Sell, Some(pos)) => self.close_position(pos.clone()).await,
            (signal, _) => {
                tracing::debug!(
                    "Signal ignored: {:?} (position open: {})",
                    signal,
                    position.is_some()
                );
                Ok(CycleOutcome::NoAction)
            }
        }
    }

    async fn open_position(&self, price: f64) -> Result<CycleOutcome, StateError> {
        let exchange = self.exchange.clone();
        let balance = match self
            .executor
            .execute("account_balance", || {
                let exchange = exchange.clone();
                async move { exchange.account_balance().await }
            })
            .await
        {
            Ok(balance) => balance,
            Err(err) => return Ok(self.report_call_failure("BALANCE_CHECK", err)),
        };

        if balance <= 0.0 {
            tracing::warn!("No available balance for trading");
            return Ok(CycleOutcome::NoAction);
        }

        // Fixed USD sizing takes priority over percentage-of-balance sizing
        let mut size = match self.settings.position_size_usd {
            Some(usd) => {
                tracing::info!("Using fixed USD position size: ${:.2}", usd);
                usd / price
            }
            None => {
                let risk_amount = balance * (self.settings.position_size_percent / 100.0);
                tracing::info!(
                    "Using percentage position size: {}% of ${:.2}",
                    self.settings.position_size_percent,
                    balance
                );
                risk_amount * self.settings.leverage as f64 / price
            }
        };

        let mut notional = size * price;
        if notional < MIN_NOTIONAL_USD {
            tracing::warn!(
                "Position size too small: ${:.2} < ${:.2} minimum, adjusting up",
                notional,
                MIN_NOTIONAL_USD
            );
            size = MIN_NOTIONAL_USD / price;
            notional = MIN_NOTIONAL_USD;
        }

        let expected_exit = price * (1.0 + self.settings.take_profit_percent / 100.0);
        let (approved, quote) = match self.fee_gate.should_execute(
            price,
            expected_exit,
            notional,
            self.settings.min_profit_ratio,
        ) {
            Ok(result) => result,
            Err(err) => {
                self.monitor
                    .record("FEE_CHECK", &err.to_string(), Severity::Error);
                return Ok(CycleOutcome::Failed {
                    kind: ErrorKind::Permanent,
                });
            }
        };

        if !approved {
            tracing::warn!(
                "Trade filtered due to fees: expected net profit ${:.2}",
                quote.net_profit.to_f64().unwrap_or(0.0)
            );
            return Ok(CycleOutcome::FeeFiltered);
        }

        let fill = match self.place_order(Side::Long, size).await {
            Ok(fill) => fill,
            Err(err) => return Ok(self.report_call_failure("ORDER_EXECUTION", err)),
        };

        let position = Position {
            symbol: self.settings.symbol.clone(),
            side: Side::Long,
            size: fill.filled_size,
            entry_price: fill.filled_price,
            entry_time: Utc::now(),
            leverage: self.settings.leverage,
        };
        self.store.set_position(Some(position))?;

        tracing::info!(
            "BUY order executed: {:.6} @ ${:.4}",
            fill.filled_size,
            fill.filled_price
        );
        Ok(CycleOutcome::Opened {
            size: fill.filled_size,
            price: fill.filled_price,
        })
    }

    async fn close_position(&self, position: Position) -> Result<CycleOutcome, StateError> {
        let fill = match self.place_order(Side::Short, position.size).await {
            Ok(fill) => fill,
            Err(err) => return Ok(self.report_call_failure("ORDER_EXECUTION", err)),
        };

        let price_difference = fill.filled_price - position.entry_price;
        let pnl = price_difference * position.size;
        let roi = price_difference / position.entry_price * 100.0;

        let trade = Trade {
            symbol: position.symbol,
            side: position.side,
            entry_price: position.entry_price,
            exit_price: fill.filled_price,
            size: position.size,
            entry_time: position.entry_time,
            exit_time: Utc::now(),
            pnl,
            fees: fill.fees,
            roi,
        };
        self.store.add_trade(trade)?;
        self.store.set_position(None)?;

        tracing::info!(
            "SELL order executed: {:.6} @ ${:.4}, PnL: ${:.2}",
            fill.filled_size,
            fill.filled_price,
            pnl
        );
        Ok(CycleOutcome::Closed { pnl, roi })
    }

    async fn place_order(&self, side: Side, size: f64) -> Result<OrderFill, CallError> {
        let exchange = self.exchange.clone();
        let symbol = self.settings.symbol.clone();
        self.executor
            .execute("place_order", move || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                async move { exchange.place_order(&symbol, side, size).await }
            })
            .await
    }

    fn report_call_failure(&self, context: &str, err: CallError) -> CycleOutcome {
        let kind = err.kind();
        tracing::error!("{} failed: {}", context, err);
        self.monitor.record(context, &err.to_string(), Severity::Error);
        CycleOutcome::Failed { kind }
    }
}
