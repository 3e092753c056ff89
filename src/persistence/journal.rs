use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::models::TradeRecord;

/// Append-only CSV trade journal
///
/// One row per closed trade, columns in `TradeRecord` field order. The file
/// is opened in append mode for every write so external tailers keep working.
/// Rows that fail to write are queued and retried before the next one.
pub struct TradeJournal {
    path: PathBuf,
    pending: VecDeque<TradeRecord>,
}

impl TradeJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows waiting for a successful write
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn append(&mut self, trade: &TradeRecord) -> Result<(), PersistenceError> {
        self.pending.push_back(trade.clone());
        self.flush()
    }

    /// Write every queued row, oldest first
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.write_pending(&mut file, needs_header)
    }

    /// Hand each queued row to `out` as one complete write
    ///
    /// Rows are encoded in memory first, so nothing stays buffered between
    /// a failed write and the retry: a row is either written and dequeued,
    /// or still queued and absent from `out`.
    fn write_pending<W: Write>(&mut self, out: &mut W, mut needs_header: bool) -> Result<(), PersistenceError> {
        while let Some(trade) = self.pending.front() {
            let row = encode_row(trade, needs_header)?;
            out.write_all(&row)?;
            out.flush()?;
            needs_header = false;
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Read every row back, for audits and reports
    pub fn read_all(path: &Path) -> Result<Vec<TradeRecord>, PersistenceError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let mut trades = Vec::new();
        for row in reader.deserialize() {
            trades.push(row?);
        }
        Ok(trades)
    }
}

fn encode_row(trade: &TradeRecord, with_header: bool) -> Result<Vec<u8>, PersistenceError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    writer.serialize(trade)?;
    writer.into_inner().map_err(|e| PersistenceError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use chrono::{TimeZone, Utc};

    fn trade(ticket: u64, profit: f64) -> TradeRecord {
        let opened = Utc.with_ymd_and_hms(2025, 11, 25, 9, 15, 0).unwrap();
        TradeRecord {
            instrument: "GBPUSD.sml".to_string(),
            direction: Direction::Sell,
            ticket,
            volume: 0.25,
            entry_price: 1.27015,
            exit_price: 1.26415,
            stop_loss: 1.27365,
            take_profit: 1.26415,
            realized_profit: profit,
            close_reason: ExitReason::TakeProfit,
            opened_at: opened,
            closed_at: opened + chrono::Duration::minutes(45),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("trades.csv");

        let mut journal = TradeJournal::new(&path);
        journal.append(&trade(1, 150.0)).unwrap();
        // a fresh handle appends to the existing file
        let mut journal = TradeJournal::new(&path);
        journal.append(&trade(2, -87.5)).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("instrument,direction,ticket,volume"));
        assert!(lines[1].contains("GBPUSD.sml,SELL,1"));

        let trades = TradeJournal::read_all(&path).unwrap();
        assert_eq!(trades, vec![trade(1, 150.0), trade(2, -87.5)]);
    }

    #[test]
    fn test_failed_rows_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();

        let mut journal = TradeJournal::new(blocker.join("trades.csv"));
        assert!(journal.append(&trade(1, 10.0)).is_err());
        assert_eq!(journal.pending(), 1);

        fs::remove_file(&blocker).unwrap();
        journal.append(&trade(2, 20.0)).unwrap();
        assert_eq!(journal.pending(), 0);

        let trades = TradeJournal::read_all(journal.path()).unwrap();
        assert_eq!(trades.iter().map(|t| t.ticket).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_missing_journal_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TradeJournal::read_all(&dir.path().join("none.csv")).unwrap().is_empty());
    }

    /// Accepts writes until `fail` is set, then rejects them whole
    struct FlakySink {
        written: Vec<u8>,
        fail: bool,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_row_is_never_written_and_queued() {
        let mut journal = TradeJournal::new("unused.csv");
        let mut sink = FlakySink { written: Vec::new(), fail: true };

        journal.pending.push_back(trade(1, 10.0));
        assert!(journal.write_pending(&mut sink, true).is_err());
        assert_eq!(journal.pending(), 1);
        assert!(sink.written.is_empty());

        sink.fail = false;
        journal.pending.push_back(trade(2, 20.0));
        journal.write_pending(&mut sink, true).unwrap();
        assert_eq!(journal.pending(), 0);

        let raw = String::from_utf8(sink.written).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("instrument,"));
        assert_eq!(lines.iter().filter(|l| l.contains(",SELL,1,")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.contains(",SELL,2,")).count(), 1);
    }
}
