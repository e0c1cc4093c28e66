//! Fee-aware trade admission.
//!
//! Every candidate trade has to clear its round-trip fees before it is worth
//! submitting. All arithmetic runs on `Decimal` so monetary values never
//! accumulate binary floating point error; results are rounded to 8 fractional
//! digits at the boundary.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// Fractional digits kept on computed monetary values
const FEE_SCALE: u32 = 8;

#[derive(Debug, Error, PartialEq)]
pub enum FeeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result of a round-trip fee computation. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuote {
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub total_fee: Decimal,
    pub gross_pnl: Decimal,
    pub net_profit: Decimal,
    /// Fees as a fraction of position size
    pub fee_ratio: Decimal,
    pub is_profitable: bool,
}

/// Computes exchange fees and decides whether an expected edge clears them
#[derive(Debug, Clone)]
pub struct FeeGate {
    maker_rate: Decimal,
    taker_rate: Decimal,
}

impl Default for FeeGate {
    fn default() -> Self {
        // Hyperliquid-style rates: 0.02% maker, 0.05% taker
        Self {
            maker_rate: Decimal::new(2, 4),
            taker_rate: Decimal::new(5, 4),
        }
    }
}

impl FeeGate {
    pub fn new(maker_rate: f64, taker_rate: f64) -> Result<Self, FeeError> {
        let maker = to_decimal("maker_rate", maker_rate)?;
        let taker = to_decimal("taker_rate", taker_rate)?;
        if maker.is_sign_negative() || taker.is_sign_negative() {
            return Err(FeeError::InvalidInput("negative fee rate".to_string()));
        }
        Ok(Self {
            maker_rate: maker,
            taker_rate: taker,
        })
    }

    /// Compute entry/exit fees and net profit for a complete round trip.
    ///
    /// `size` is the position size in quote currency (notional).
    pub fn compute(
        &self,
        entry_price: f64,
        exit_price: f64,
        size: f64,
        entry_is_maker: bool,
        exit_is_maker: bool,
    ) -> Result<FeeQuote, FeeError> {
        let entry = positive_decimal("entry_price", entry_price)?;
        let exit = positive_decimal("exit_price", exit_price)?;
        let size = positive_decimal("size", size)?;

        let entry_rate = if entry_is_maker {
            self.maker_rate
        } else {
            self.taker_rate
        };
        let exit_rate = if exit_is_maker {
            self.maker_rate
        } else {
            self.taker_rate
        };

        let entry_fee = size * entry_rate;
        let exit_fee = size * exit_rate;
        let total_fee = entry_fee + exit_fee;

        let gross_pnl = (exit - entry) / entry * size;
        let net_profit = gross_pnl - total_fee;
        let fee_ratio = total_fee / size;

        Ok(FeeQuote {
            entry_fee: entry_fee.round_dp(FEE_SCALE),
            exit_fee: exit_fee.round_dp(FEE_SCALE),
            total_fee: total_fee.round_dp(FEE_SCALE),
            gross_pnl: gross_pnl.round_dp(FEE_SCALE),
            net_profit: net_profit.round_dp(FEE_SCALE),
            fee_ratio: fee_ratio.round_dp(FEE_SCALE),
            is_profitable: net_profit > Decimal::ZERO,
        })
    }

    /// Decide whether a trade should be submitted.
    ///
    /// Conservatively assumes maker entry (limit) and taker exit (market);
    /// approves only when `net_profit / size` meets `min_profit_ratio`.
    pub fn should_execute(
        &self,
        entry_price: f64,
        expected_exit_price: f64,
        size: f64,
        min_profit_ratio: f64,
    ) -> Result<(bool, FeeQuote), FeeError> {
        let quote = self.compute(entry_price, expected_exit_price, size, true, false)?;

        let size_d = positive_decimal("size", size)?;
        let threshold = to_decimal("min_profit_ratio", min_profit_ratio)?;
        let profit_ratio = quote.net_profit / size_d;
        let approved = profit_ratio >= threshold;

        if approved {
            tracing::info!(
                "Trade approved: expected profit ratio {:.6}, fees {:.6}, net ${}",
                profit_ratio,
                quote.fee_ratio,
                quote.net_profit
            );
        } else {
            tracing::warn!(
                "Trade filtered, expected return below fees: profit ratio {:.6}, fees {:.6}, net ${}",
                profit_ratio,
                quote.fee_ratio,
                quote.net_profit
            );
        }

        Ok((approved, quote))
    }

    /// Worst-case relative price move needed to break even on fees
    /// (taker entry and taker exit).
    pub fn break_even_move(&self) -> Decimal {
        self.taker_rate * Decimal::TWO
    }
}

fn to_decimal(name: &str, value: f64) -> Result<Decimal, FeeError> {
    Decimal::from_f64(value)
        .ok_or_else(|| FeeError::InvalidInput(format!("{name} is not a finite number: {value}")))
}

fn positive_decimal(name: &str, value: f64) -> Result<Decimal, FeeError> {
    let d = to_decimal(name, value)?;
    if d <= Decimal::ZERO {
        return Err(FeeError::InvalidInput(format!("{name} must be positive: {value}")));
    }
    Ok(d)
}
