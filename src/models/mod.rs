use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a position or order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Trading signal produced by a strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// The single open position. Immutable while open; closing it produces a
/// [`Trade`] and clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub leverage: u32,
}

impl Position {
    /// Notional value in quote currency
    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }
}

/// Completed trade record, created only by closing a position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub fees: f64,
    pub roi: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_notional() {
        let position = Position {
            symbol: "LINK".to_string(),
            side: Side::Long,
            size: 100.0,
            entry_price: 15.5,
            entry_time: Utc::now(),
            leverage: 10,
        };

        assert_eq!(position.notional(), 1550.0);
    }

    #[test]
    fn test_side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"long\"");
        assert_eq!(serde_json::to_string(&Side::Short).unwrap(), "\"short\"");
    }

    #[test]
    fn test_trade_roundtrip() {
        let trade = Trade {
            symbol: "LINK".to_string(),
            side: Side::Long,
            entry_price: 15.0,
            exit_price: 16.0,
            size: 100.0,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            pnl: 100.0,
            fees: 1.05,
            roi: 6.67,
        };

        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trade);
    }
}
