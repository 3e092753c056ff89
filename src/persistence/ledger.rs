use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::write_atomic;
use crate::error::PersistenceError;
use crate::models::TradeRecord;

/// Aggregate trading statistics
///
/// `total_profit` is the sum of realized profit over `trades`; `win_rate` is
/// the percentage of trades with positive profit, 0 when there are none.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub trades: Vec<TradeRecord>,
    pub total_profit: f64,
    pub win_rate: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl Stats {
    /// Recompute the aggregates from the trade list
    pub fn recompute(&mut self) {
        self.total_profit = self.trades.iter().map(|t| t.realized_profit).sum();
        self.win_rate = if self.trades.is_empty() {
            0.0
        } else {
            let wins = self.trades.iter().filter(|t| t.is_win()).count();
            (wins as f64 / self.trades.len() as f64 * 10_000.0).round() / 100.0
        };
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Read a snapshot without touching the file
    ///
    /// A missing file reads as empty stats. Anything unreadable or corrupt
    /// is returned as an error and left where it is.
    pub fn read(path: &Path) -> Result<Stats, PersistenceError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Stats::default()),
            Err(e) => return Err(e.into()),
        };
        let mut stats: Stats = serde_json::from_str(&raw)?;
        stats.recompute();
        Ok(stats)
    }
}

/// Process-wide statistics with a JSON snapshot on disk
///
/// The snapshot is overwritten atomically after every trade. A failed write
/// keeps the in-memory state and is retried with the next update.
pub struct StatsLedger {
    path: PathBuf,
    stats: Stats,
    dirty: bool,
}

impl StatsLedger {
    /// Restore the last snapshot, or start empty
    ///
    /// A missing file starts empty. An unreadable or corrupt one is moved
    /// aside to `<name>.corrupt` and the ledger starts empty; startup never
    /// fails here.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = match Stats::read(&path) {
            Ok(stats) => {
                if !stats.trades.is_empty() {
                    tracing::info!(
                        "Restored {} trades from {} (total profit: {:.2})",
                        stats.trades.len(),
                        path.display(),
                        stats.total_profit
                    );
                }
                stats
            }
            Err(PersistenceError::Json(e)) => {
                tracing::warn!("Corrupt stats file {}: {}", path.display(), e);
                Self::quarantine(&path);
                Stats::default()
            }
            Err(e) => {
                tracing::warn!("Cannot read stats file {}: {}", path.display(), e);
                Stats::default()
            }
        };

        Self {
            path,
            stats,
            dirty: false,
        }
    }

    fn quarantine(path: &Path) {
        let mut aside = path.as_os_str().to_owned();
        aside.push(".corrupt");
        if let Err(e) = fs::rename(path, &aside) {
            tracing::warn!("Could not move corrupt stats file aside: {}", e);
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the on-disk snapshot is behind memory
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append a closed trade, recompute the aggregates and persist
    pub fn record(&mut self, trade: TradeRecord) -> Result<(), PersistenceError> {
        self.record_at(trade, Utc::now())
    }

    pub fn record_at(&mut self, trade: TradeRecord, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.stats.trades.push(trade);
        self.stats.recompute();
        self.stats.last_update = Some(now);
        self.dirty = true;
        self.flush()
    }

    /// Write the snapshot if it is behind memory
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&self.stats)?;
        write_atomic(&self.path, &json)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use chrono::TimeZone;

    fn trade(ticket: u64, profit: f64) -> TradeRecord {
        let at = Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap();
        TradeRecord {
            instrument: "EURUSD".to_string(),
            direction: Direction::Buy,
            ticket,
            volume: 0.1,
            entry_price: 1.1,
            exit_price: 1.101,
            stop_loss: 1.09,
            take_profit: 1.11,
            realized_profit: profit,
            close_reason: if profit > 0.0 { ExitReason::TakeProfit } else { ExitReason::StopLoss },
            opened_at: at,
            closed_at: at,
        }
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StatsLedger::load(dir.path().join("stats.json"));
        assert_eq!(ledger.stats(), &Stats::default());
    }

    #[test]
    fn test_record_updates_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = StatsLedger::load(dir.path().join("stats.json"));

        ledger.record(trade(1, 25.0)).unwrap();
        ledger.record(trade(2, -10.0)).unwrap();
        ledger.record(trade(3, 0.0)).unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.trade_count(), 3);
        assert!((stats.total_profit - 15.0).abs() < 1e-9);
        // zero profit is not a win
        assert!((stats.win_rate - 33.33).abs() < 0.01);
        assert!(stats.last_update.is_some());
    }

    #[test]
    fn test_reload_keeps_identical_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("stats.json");

        let mut ledger = StatsLedger::load(&path);
        for (i, profit) in [12.34, -5.5, 7.75, -0.01].iter().enumerate() {
            ledger.record(trade(i as u64, *profit)).unwrap();
        }
        let before = ledger.stats().clone();

        let reloaded = StatsLedger::load(&path);
        assert_eq!(reloaded.stats(), &before);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "{ not json").unwrap();

        let ledger = StatsLedger::load(&path);
        assert!(ledger.stats().trades.is_empty());
        assert!(dir.path().join("stats.json.corrupt").exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_read_leaves_corrupt_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Stats::read(&path), Err(PersistenceError::Json(_))));
        assert!(path.exists());
        assert!(!dir.path().join("stats.json.corrupt").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_read_matches_ledger_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        assert_eq!(Stats::read(&path).unwrap(), Stats::default());

        let mut ledger = StatsLedger::load(&path);
        ledger.record(trade(1, 25.0)).unwrap();
        ledger.record(trade(2, -10.0)).unwrap();

        assert_eq!(&Stats::read(&path).unwrap(), ledger.stats());
    }

    #[test]
    fn test_failed_write_keeps_memory_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "file, not a directory").unwrap();
        let path = blocker.join("stats.json");

        let mut ledger = StatsLedger::load(&path);
        assert!(ledger.record(trade(1, 5.0)).is_err());
        assert_eq!(ledger.stats().trade_count(), 1);
        assert!(ledger.is_dirty());

        // still failing on the next update, state keeps growing
        assert!(ledger.record(trade(2, 5.0)).is_err());
        assert_eq!(ledger.stats().trade_count(), 2);

        fs::remove_file(&blocker).unwrap();
        ledger.flush().unwrap();
        assert!(!ledger.is_dirty());
        assert_eq!(StatsLedger::load(&path).stats().trade_count(), 2);
    }
}
