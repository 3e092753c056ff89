use chrono::{DateTime, Utc};

use crate::execution::PositionManager;
use crate::models::{Direction, Signal};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Enter(Direction),
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Entry gate in front of the lifecycle book
///
/// Applies the pause flag, the one-position-per-instrument rule, the global
/// position cap and the cooldown window, in that order.
#[derive(Debug, Default)]
pub struct Executor {
    paused: bool,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pre-check run before any market data is fetched for `instrument`
    ///
    /// Returns the skip decision when an entry is impossible anyway.
    pub fn check_entry(
        &self,
        pm: &PositionManager,
        instrument: &str,
        now: DateTime<Utc>,
    ) -> Option<ExecutionDecision> {
        if self.paused {
            return Some(ExecutionDecision::skip("Entries paused"));
        }
        pm.can_enter(instrument, now)
            .err()
            .map(|block| ExecutionDecision::skip(block.to_string()))
    }

    /// Process a signal and decide what to do
    pub fn process_signal(
        &self,
        pm: &PositionManager,
        signal: &Signal,
        instrument: &str,
        now: DateTime<Utc>,
    ) -> ExecutionDecision {
        let Some(direction) = signal.direction() else {
            return ExecutionDecision::skip("Hold signal");
        };

        if self.paused {
            return ExecutionDecision::skip("Entries paused");
        }

        match pm.can_enter(instrument, now) {
            Ok(()) => ExecutionDecision {
                action: ExecutionAction::Enter(direction),
                reason: format!("{} signal with free slot", direction),
            },
            Err(block) => ExecutionDecision::skip(block.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Position;
    use crate::risk::CooldownTracker;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap()
    }

    fn manager() -> PositionManager {
        PositionManager::new(1, CooldownTracker::new(Duration::seconds(900)))
    }

    fn fill(pm: &mut PositionManager, instrument: &str) {
        pm.begin_entry(instrument, Direction::Buy, now()).unwrap();
        pm.entry_filled(Position {
            instrument: instrument.to_string(),
            direction: Direction::Buy,
            ticket: 1,
            volume: 0.1,
            entry_price: 1.1,
            stop_loss: 1.09,
            take_profit: 1.11,
            opened_at: now(),
            floating_profit: 0.0,
            last_price: None,
        })
        .unwrap();
    }

    #[test]
    fn test_skip_when_already_positioned() {
        let mut pm = manager();
        fill(&mut pm, "EURUSD");

        let decision = Executor::new().process_signal(&pm, &Signal::Buy, "EURUSD", now());
        assert_eq!(decision.action, ExecutionAction::Skip);
        assert!(decision.reason.contains("Already have"));
    }

    #[test]
    fn test_skip_when_cap_reached() {
        let mut pm = manager();
        fill(&mut pm, "EURUSD");

        let decision = Executor::new().process_signal(&pm, &Signal::Sell, "GBPUSD", now());
        assert_eq!(decision.action, ExecutionAction::Skip);
        assert!(decision.reason.contains("Max open positions"));
    }

    #[test]
    fn test_enter_on_signal() {
        let pm = manager();
        let decision = Executor::new().process_signal(&pm, &Signal::Sell, "EURUSD", now());
        assert_eq!(decision.action, ExecutionAction::Enter(Direction::Sell));
    }

    #[test]
    fn test_hold_and_pause_skip() {
        let pm = manager();
        let mut executor = Executor::new();
        let decision = executor.process_signal(&pm, &Signal::Hold, "EURUSD", now());
        assert_eq!(decision.action, ExecutionAction::Skip);

        executor.set_paused(true);
        let decision = executor.process_signal(&pm, &Signal::Buy, "EURUSD", now());
        assert!(decision.reason.contains("paused"));
        let blocked = executor.check_entry(&pm, "EURUSD", now()).unwrap();
        assert!(blocked.reason.contains("paused"));

        executor.set_paused(false);
        assert!(executor.check_entry(&pm, "EURUSD", now()).is_none());
    }
}
