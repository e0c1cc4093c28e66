//! Runtime configuration, loaded from environment variables.
//!
//! Every knob has a sane default so a dry run works with an empty
//! environment. `.env` loading happens in `main`, not here, so tests and
//! library consumers control exactly what the environment contains.

use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Bot settings. Field defaults match a conservative dry-run setup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Paper trading when true; no real orders leave the process
    pub dry_run: bool,
    pub symbol: String,
    pub leverage: u32,

    /// Fixed USD position size; takes priority over percentage sizing
    pub position_size_usd: Option<f64>,
    /// Percent of available balance risked per trade
    pub position_size_percent: f64,
    pub stop_loss_percent: f64,
    /// Assumed profit target used when pre-checking fee viability
    pub take_profit_percent: f64,
    /// Minimum net-profit-to-position-size ratio a trade must clear
    pub min_profit_ratio: f64,
    /// Exchange fee schedule; fixed, not read from the environment
    pub maker_fee_rate: f64,
    pub taker_fee_rate: f64,

    /// Error/Critical occurrences that trip the circuit breaker
    pub circuit_breaker_errors: u32,
    pub circuit_breaker_window_hours: i64,
    pub retry_attempts: u32,
    /// Base retry delay in seconds
    pub retry_delay: f64,

    pub state_file: PathBuf,
    pub roi_file: PathBuf,
    /// Starting balance for ROI accounting
    pub initial_balance: f64,

    /// Seconds between trading cycles
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dry_run: true,
            symbol: "LINK".to_string(),
            leverage: 10,
            position_size_usd: None,
            position_size_percent: 1.0,
            stop_loss_percent: 2.5,
            take_profit_percent: 5.0,
            min_profit_ratio: 0.001,
            maker_fee_rate: 0.0002,
            taker_fee_rate: 0.0005,
            circuit_breaker_errors: 5,
            circuit_breaker_window_hours: 1,
            retry_attempts: 3,
            retry_delay: 1.0,
            state_file: PathBuf::from("state/bot_state.json"),
            roi_file: PathBuf::from("state/roi_data.json"),
            initial_balance: 1000.0,
            poll_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Build settings from the process environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let settings = Settings {
            dry_run: var_or("DRY_RUN", defaults.dry_run)?,
            symbol: var_or("SYMBOL", defaults.symbol)?,
            leverage: var_or("LEVERAGE", defaults.leverage)?,
            position_size_usd: var_opt("POSITION_SIZE_USD")?,
            position_size_percent: var_or("POSITION_SIZE_PERCENT", defaults.position_size_percent)?,
            stop_loss_percent: var_or("STOP_LOSS_PERCENT", defaults.stop_loss_percent)?,
            take_profit_percent: var_or("TAKE_PROFIT_PERCENT", defaults.take_profit_percent)?,
            min_profit_ratio: var_or("MIN_PROFIT_RATIO", defaults.min_profit_ratio)?,
            maker_fee_rate: defaults.maker_fee_rate,
            taker_fee_rate: defaults.taker_fee_rate,
            circuit_breaker_errors: var_or("CIRCUIT_BREAKER_ERRORS", defaults.circuit_breaker_errors)?,
            circuit_breaker_window_hours: var_or(
                "CIRCUIT_BREAKER_WINDOW_HOURS",
                defaults.circuit_breaker_window_hours,
            )?,
            retry_attempts: var_or("RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_delay: var_or("RETRY_DELAY", defaults.retry_delay)?,
            state_file: var_or("STATE_FILE", defaults.state_file)?,
            roi_file: var_or("ROI_FILE", defaults.roi_file)?,
            initial_balance: var_or("INITIAL_BALANCE", defaults.initial_balance)?,
            poll_interval_secs: var_or("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field validation. Collects every problem instead of stopping at
    /// the first so one restart fixes them all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.symbol.trim().is_empty() {
            errors.push("SYMBOL must not be empty".to_string());
        }
        if !(1..=50).contains(&self.leverage) {
            errors.push("LEVERAGE must be between 1 and 50".to_string());
        }
        if !(0.0..=10.0).contains(&self.position_size_percent)
            || self.position_size_percent == 0.0
        {
            errors.push("POSITION_SIZE_PERCENT must be between 0 and 10".to_string());
        }
        if let Some(usd) = self.position_size_usd {
            if usd <= 0.0 {
                errors.push("POSITION_SIZE_USD must be positive".to_string());
            }
        }
        if !(0.0..=20.0).contains(&self.stop_loss_percent) || self.stop_loss_percent == 0.0 {
            errors.push("STOP_LOSS_PERCENT must be between 0 and 20".to_string());
        }
        if self.take_profit_percent <= 0.0 {
            errors.push("TAKE_PROFIT_PERCENT must be positive".to_string());
        }
        if self.min_profit_ratio < 0.0 {
            errors.push("MIN_PROFIT_RATIO must not be negative".to_string());
        }
        if self.circuit_breaker_errors < 1 {
            errors.push("CIRCUIT_BREAKER_ERRORS must be greater than 0".to_string());
        }
        if self.circuit_breaker_window_hours < 1 {
            errors.push("CIRCUIT_BREAKER_WINDOW_HOURS must be greater than 0".to_string());
        }
        if self.initial_balance <= 0.0 {
            errors.push("INITIAL_BALANCE must be positive".to_string());
        }
        if self.poll_interval_secs == 0 {
            errors.push("POLL_INTERVAL_SECS must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join(", ")))
        }
    }
}

fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse(name, raw),
        Err(_) => Ok(default),
    }
}

fn var_opt<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse(name, raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse<T: FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    // Accept Python-style "True"/"False" capitalization for booleans
    let normalized = raw.trim();
    normalized
        .parse()
        .or_else(|_| normalized.to_lowercase().parse())
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.symbol, "LINK");
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.circuit_breaker_errors, 5);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("SYMBOL", "ETH");
        std::env::set_var("RETRY_ATTEMPTS", "7");
        std::env::set_var("DRY_RUN", "False");

        let settings = Settings::from_env().unwrap();

        std::env::remove_var("SYMBOL");
        std::env::remove_var("RETRY_ATTEMPTS");
        std::env::remove_var("DRY_RUN");

        assert_eq!(settings.symbol, "ETH");
        assert_eq!(settings.retry_attempts, 7);
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let settings = Settings {
            leverage: 0,
            circuit_breaker_errors: 0,
            initial_balance: -5.0,
            ..Settings::default()
        };

        let err = settings.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("LEVERAGE"));
        assert!(msg.contains("CIRCUIT_BREAKER_ERRORS"));
        assert!(msg.contains("INITIAL_BALANCE"));
    }

    #[test]
    fn test_invalid_leverage_range() {
        let settings = Settings {
            leverage: 100,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
