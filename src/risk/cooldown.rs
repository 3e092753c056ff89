use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::Instrument;

/// Re-entry suppression after a close
///
/// Entries are never swept; age is computed on read and a later close simply
/// overwrites the timestamp.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
    last_close: HashMap<Instrument, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_close: HashMap::new(),
        }
    }

    pub fn blocked(&self, instrument: &str, now: DateTime<Utc>) -> bool {
        self.last_close
            .get(instrument)
            .is_some_and(|closed_at| now - *closed_at < self.window)
    }

    pub fn record_close(&mut self, instrument: &str, now: DateTime<Utc>) {
        self.last_close.insert(instrument.to_string(), now);
    }

    /// Time left before the instrument may be traded again
    pub fn remaining(&self, instrument: &str, now: DateTime<Utc>) -> Option<Duration> {
        let closed_at = self.last_close.get(instrument)?;
        let left = self.window - (now - *closed_at);
        (left > Duration::zero()).then_some(left)
    }
}
