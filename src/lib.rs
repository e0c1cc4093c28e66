// Core modules
pub mod config;
pub mod engine;
pub mod exchange;
pub mod fees;
pub mod models;
pub mod monitor;
pub mod state;

// Re-export commonly used types
pub use config::Settings;
pub use engine::{CycleOutcome, TradingEngine};
pub use exchange::{CallError, ErrorKind, ExchangeApi, PaperExchange, RetryExecutor, RetryPolicy};
pub use fees::FeeGate;
pub use models::{Position, Side, Signal, Trade};
pub use monitor::{ErrorMonitor, MonitorConfig, Severity};
pub use state::StateStore;
