//! Durable bot state: open position, trade history, and ROI aggregates.
//!
//! Everything lives in two JSON files written atomically (temp file in the
//! same directory, fsync, rename) so a crash mid-write can never leave a
//! half-written file behind. A missing file means a fresh start; a file that
//! exists but does not parse is fatal, because trading on top of silently
//! discarded state is worse than refusing to start.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::models::{Position, Trade};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to parse state file {path}: {source}")]
    Load {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize state for {path}: {source}")]
    Save {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("state file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// ROI aggregates, updated on every closed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    pub initial_balance: f64,
    pub current_balance: f64,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Worst observed drop below the initial balance, as a fraction. Only
    /// ever ratchets upward.
    pub max_drawdown: f64,
    pub max_drawdown_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Roi {
    fn new(initial_balance: f64) -> Self {
        let now = Utc::now();
        Self {
            initial_balance,
            current_balance: initial_balance,
            total_pnl: 0.0,
            total_fees: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            max_drawdown: 0.0,
            max_drawdown_date: now,
            last_updated: now,
        }
    }

    fn apply(&mut self, trade: &Trade) {
        let now = Utc::now();

        self.current_balance += trade.pnl - trade.fees;
        self.total_pnl += trade.pnl;
        self.total_fees += trade.fees;
        self.total_trades += 1;

        if trade.pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }

        let drawdown = (self.initial_balance - self.current_balance) / self.initial_balance;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            self.max_drawdown_date = now;
        }

        self.last_updated = now;
    }
}

/// Snapshot of overall performance for reporting
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub initial_balance: f64,
    pub current_balance: f64,
    /// Percent return on the initial balance
    pub total_roi: f64,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Percent of trades closed with positive PnL
    pub win_rate: f64,
    /// Percent, not fraction
    pub max_drawdown: f64,
    pub max_drawdown_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// On-disk shape of the ledger file
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    current_position: Option<Position>,
    trades: Vec<Trade>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StateInner {
    position: Option<Position>,
    trades: Vec<Trade>,
    roi: Option<Roi>,
}

/// Persistent state store. All mutation happens under one lock and every
/// mutation is flushed to disk before the call returns, so the in-memory view
/// and the files never diverge.
#[derive(Debug)]
pub struct StateStore {
    ledger_path: PathBuf,
    roi_path: PathBuf,
    initial_balance: f64,
    inner: Mutex<StateInner>,
}

impl StateStore {
    /// Open the store, creating parent directories and loading whatever the
    /// previous run left behind.
    pub fn open(
        ledger_path: impl Into<PathBuf>,
        roi_path: impl Into<PathBuf>,
        initial_balance: f64,
    ) -> Result<Self, StateError> {
        let ledger_path = ledger_path.into();
        let roi_path = roi_path.into();

        for path in [&ledger_path, &roi_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StateError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut inner = StateInner::default();

        if let Some(ledger) = read_json::<LedgerFile>(&ledger_path)? {
            inner.position = ledger.current_position;
            inner.trades = ledger.trades;
            tracing::info!(
                "State loaded: position={}, trades={}",
                inner.position.is_some(),
                inner.trades.len()
            );
        }

        if let Some(roi) = read_json::<Roi>(&roi_path)? {
            tracing::info!(
                "ROI data loaded: balance=${:.2}, pnl=${:.2}",
                roi.current_balance,
                roi.total_pnl
            );
            inner.roi = Some(roi);
        }

        Ok(Self {
            ledger_path,
            roi_path,
            initial_balance,
            inner: Mutex::new(inner),
        })
    }

    /// Replace the current position (None clears it) and persist
    pub fn set_position(&self, position: Option<Position>) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();

        match &position {
            Some(p) => tracing::info!(
                "Position updated: {} {} {:.6} @ ${:.4}",
                p.symbol,
                p.side,
                p.size,
                p.entry_price
            ),
            None => tracing::info!("Position cleared"),
        }

        inner.position = position;
        self.write_ledger(&inner)
    }

    /// Append a closed trade, fold it into the ROI aggregates, and persist
    /// both files.
    pub fn add_trade(&self, trade: Trade) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();

        tracing::info!(
            "Trade added: {} {} PnL=${:.2} ROI={:.2}%",
            trade.symbol,
            trade.side,
            trade.pnl,
            trade.roi
        );

        let roi = inner
            .roi
            .get_or_insert_with(|| Roi::new(self.initial_balance));
        roi.apply(&trade);
        let roi = roi.clone();
        inner.trades.push(trade);

        self.write_ledger(&inner)?;
        write_atomic(&self.roi_path, &roi)
    }

    pub fn current_position(&self) -> Option<Position> {
        self.inner.lock().unwrap().position.clone()
    }

    pub fn roi(&self) -> Option<Roi> {
        self.inner.lock().unwrap().roi.clone()
    }

    /// Trades whose exit falls within the last `days`
    pub fn recent_trades(&self, days: i64) -> Vec<Trade> {
        let cutoff = Utc::now() - Duration::days(days);
        self.inner
            .lock()
            .unwrap()
            .trades
            .iter()
            .filter(|t| t.exit_time >= cutoff)
            .cloned()
            .collect()
    }

    /// Performance summary, or None before the first closed trade
    pub fn performance(&self) -> Option<Performance> {
        let inner = self.inner.lock().unwrap();
        let roi = inner.roi.as_ref()?;

        let total_roi =
            (roi.current_balance - roi.initial_balance) / roi.initial_balance * 100.0;
        let win_rate = if roi.total_trades > 0 {
            roi.winning_trades as f64 / roi.total_trades as f64 * 100.0
        } else {
            0.0
        };

        Some(Performance {
            initial_balance: roi.initial_balance,
            current_balance: roi.current_balance,
            total_roi,
            total_pnl: roi.total_pnl,
            total_fees: roi.total_fees,
            total_trades: roi.total_trades,
            winning_trades: roi.winning_trades,
            losing_trades: roi.losing_trades,
            win_rate,
            max_drawdown: roi.max_drawdown * 100.0,
            max_drawdown_date: roi.max_drawdown_date,
            last_updated: roi.last_updated,
        })
    }

    /// Wipe all state, in memory and on disk
    pub fn reset(&self) -> Result<(), StateError> {
        let mut inner = self.inner.lock().unwrap();
        *inner = StateInner::default();

        for path in [&self.ledger_path, &self.roi_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StateError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        tracing::warn!("State reset - all data cleared");
        Ok(())
    }

    fn write_ledger(&self, inner: &StateInner) -> Result<(), StateError> {
        let ledger = LedgerFile {
            current_position: inner.position.clone(),
            trades: inner.trades.clone(),
            last_updated: Utc::now(),
        };
        write_atomic(&self.ledger_path, &ledger)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StateError::Load {
            path: path.to_path_buf(),
            source,
        })
}

/// Write JSON to `path` so readers see either the old or the new contents,
/// never a partial file: temp file in the same directory, fsync, then rename
/// over the target.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = NamedTempFile::new_in(dir.unwrap_or(Path::new("."))).map_err(|source| {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;

    serde_json::to_writer_pretty(&mut tmp, value).map_err(|source| StateError::Save {
        path: path.to_path_buf(),
        source,
    })?;

    tmp.as_file().sync_all().map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tmp.persist(path).map_err(|e| StateError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    tracing::debug!("State saved atomically to {}", path.display());
    Ok(())
}
