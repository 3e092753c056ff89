use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::execution::gateway::BrokerPosition;
use crate::models::{Direction, ExitReason, Instrument, Quote, Ticket, TradeRecord};
use crate::risk::CooldownTracker;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument: Instrument,
    pub direction: Direction,
    pub ticket: Ticket,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    /// Last broker-reported floating profit
    pub floating_profit: f64,
    /// Last monitored price seen by the exit check
    pub last_price: Option<f64>,
}

impl Position {
    pub fn from_broker(record: &BrokerPosition, now: DateTime<Utc>) -> Self {
        Self {
            instrument: record.instrument.clone(),
            direction: record.direction,
            ticket: record.ticket,
            volume: record.volume,
            entry_price: record.entry_price,
            stop_loss: record.stop_loss,
            take_profit: record.take_profit,
            opened_at: record.opened_at.unwrap_or(now),
            floating_profit: record.profit,
            last_price: None,
        }
    }

    /// Exit condition at `price`
    ///
    /// Take-profit is evaluated first, then stop-loss; the first true one
    /// wins. A zero level means the level is not set.
    pub fn exit_reason(&self, price: f64) -> Option<ExitReason> {
        let (tp_hit, sl_hit) = match self.direction {
            Direction::Buy => (price >= self.take_profit, price <= self.stop_loss),
            Direction::Sell => (price <= self.take_profit, price >= self.stop_loss),
        };

        if self.take_profit > 0.0 && tp_hit {
            return Some(ExitReason::TakeProfit);
        }
        if self.stop_loss > 0.0 && sl_hit {
            return Some(ExitReason::StopLoss);
        }
        None
    }

    pub fn into_record(
        self,
        exit_price: f64,
        realized_profit: f64,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> TradeRecord {
        TradeRecord {
            instrument: self.instrument,
            direction: self.direction,
            ticket: self.ticket,
            volume: self.volume,
            entry_price: self.entry_price,
            exit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            realized_profit,
            close_reason: reason,
            opened_at: self.opened_at,
            closed_at,
        }
    }
}

/// Lifecycle state of one instrument; absence from the book means FLAT
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Entry order in flight
    PendingEntry { direction: Direction, since: DateTime<Utc> },
    Open(Position),
    /// Close order in flight
    PendingExit(Position),
    /// Submission outcome unknown (timed out); resolved by the next broker sync
    Unreconciled { direction: Direction, since: DateTime<Utc> },
}

impl Slot {
    pub fn label(&self) -> &'static str {
        match self {
            Slot::PendingEntry { .. } => "PENDING_ENTRY",
            Slot::Open(_) => "OPEN",
            Slot::PendingExit(_) => "PENDING_EXIT",
            Slot::Unreconciled { .. } => "UNRECONCILED",
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            Slot::Open(position) | Slot::PendingExit(position) => Some(position),
            _ => None,
        }
    }
}

/// Why an entry may not start
#[derive(Debug, Clone, PartialEq)]
pub enum EntryBlock {
    AlreadyActive(&'static str),
    MaxPositions(usize),
    Cooldown(chrono::Duration),
}

impl std::fmt::Display for EntryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryBlock::AlreadyActive(state) => write!(f, "Already have position ({})", state),
            EntryBlock::MaxPositions(max) => write!(f, "Max open positions reached ({})", max),
            EntryBlock::Cooldown(left) => write!(f, "Cooldown active, {}s left", left.num_seconds()),
        }
    }
}

/// Result of matching the book against the broker's open positions
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Broker positions the book did not know about
    pub adopted: Vec<Position>,
    /// Tracked positions the broker no longer reports
    pub vanished: Vec<TradeRecord>,
    /// Unreconciled submissions that never showed up at the broker
    pub released: Vec<Instrument>,
}

/// Per-instrument order lifecycle book
///
/// FLAT -> PENDING_ENTRY -> OPEN -> PENDING_EXIT -> FLAT. Every non-flat slot
/// counts toward `max_open_positions`, so an in-flight or unreconciled order
/// can never let the cap be exceeded.
pub struct PositionManager {
    slots: BTreeMap<Instrument, Slot>,
    max_open_positions: usize,
    cooldown: CooldownTracker,
}

impl PositionManager {
    pub fn new(max_open_positions: usize, cooldown: CooldownTracker) -> Self {
        Self {
            slots: BTreeMap::new(),
            max_open_positions,
            cooldown,
        }
    }

    pub fn max_open_positions(&self) -> usize {
        self.max_open_positions
    }

    /// Non-flat slots
    pub fn occupied(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, instrument: &str) -> Option<&Slot> {
        self.slots.get(instrument)
    }

    pub fn has_open_position(&self, instrument: &str) -> bool {
        self.slots.contains_key(instrument)
    }

    /// Get all open positions, ordered by instrument
    pub fn open_positions(&self) -> Vec<&Position> {
        self.slots.values().filter_map(Slot::position).collect()
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Check whether FLAT -> PENDING_ENTRY is allowed at `now`
    pub fn can_enter(&self, instrument: &str, now: DateTime<Utc>) -> Result<(), EntryBlock> {
        if let Some(slot) = self.slots.get(instrument) {
            return Err(EntryBlock::AlreadyActive(slot.label()));
        }
        if self.occupied() >= self.max_open_positions {
            return Err(EntryBlock::MaxPositions(self.max_open_positions));
        }
        if let Some(left) = self.cooldown.remaining(instrument, now) {
            return Err(EntryBlock::Cooldown(left));
        }
        Ok(())
    }

    pub fn begin_entry(
        &mut self,
        instrument: &str,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Err(block) = self.can_enter(instrument, now) {
            anyhow::bail!("Cannot enter {}: {}", instrument, block);
        }
        self.slots.insert(
            instrument.to_string(),
            Slot::PendingEntry { direction, since: now },
        );
        Ok(())
    }

    /// PENDING_ENTRY -> OPEN
    pub fn entry_filled(&mut self, position: Position) -> anyhow::Result<()> {
        match self.slots.get(&position.instrument) {
            Some(Slot::PendingEntry { .. }) => {
                self.slots
                    .insert(position.instrument.clone(), Slot::Open(position));
                Ok(())
            }
            other => anyhow::bail!(
                "Fill for {} without pending entry (state: {:?})",
                position.instrument,
                other.map(Slot::label)
            ),
        }
    }

    /// PENDING_ENTRY -> FLAT after a definite rejection
    pub fn entry_failed(&mut self, instrument: &str) {
        if matches!(self.slots.get(instrument), Some(Slot::PendingEntry { .. })) {
            self.slots.remove(instrument);
        }
    }

    /// PENDING_ENTRY -> UNRECONCILED when the outcome is unknown
    pub fn entry_unknown(&mut self, instrument: &str, now: DateTime<Utc>) {
        if let Some(Slot::PendingEntry { direction, .. }) = self.slots.get(instrument) {
            let direction = *direction;
            self.slots.insert(
                instrument.to_string(),
                Slot::Unreconciled { direction, since: now },
            );
        }
    }

    /// Check one open position against the live quote, recording the price seen
    pub fn check_exit(&mut self, instrument: &str, quote: &Quote) -> Option<(ExitReason, f64)> {
        let Some(Slot::Open(position)) = self.slots.get_mut(instrument) else {
            return None;
        };
        let price = position.direction.monitored_price(quote);
        position.last_price = Some(price);
        position.exit_reason(price).map(|reason| (reason, price))
    }

    /// OPEN -> PENDING_EXIT
    pub fn begin_exit(&mut self, instrument: &str) -> Option<Ticket> {
        match self.slots.remove(instrument) {
            Some(Slot::Open(position)) => {
                let ticket = position.ticket;
                self.slots
                    .insert(instrument.to_string(), Slot::PendingExit(position));
                Some(ticket)
            }
            Some(other) => {
                self.slots.insert(instrument.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// PENDING_EXIT -> OPEN when the close did not go through
    pub fn exit_failed(&mut self, instrument: &str) {
        if let Some(Slot::PendingExit(position)) = self.slots.remove(instrument) {
            self.slots.insert(instrument.to_string(), Slot::Open(position));
        }
    }

    /// PENDING_EXIT -> FLAT; starts the cooldown and returns the trade
    pub fn exit_completed(
        &mut self,
        instrument: &str,
        exit_price: f64,
        realized_profit: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TradeRecord> {
        match self.slots.remove(instrument) {
            Some(Slot::PendingExit(position)) => {
                self.cooldown.record_close(instrument, now);
                Ok(position.into_record(exit_price, realized_profit, reason, now))
            }
            Some(other) => {
                let label = other.label();
                self.slots.insert(instrument.to_string(), other);
                anyhow::bail!("Close for {} without pending exit (state: {})", instrument, label)
            }
            None => anyhow::bail!("Close for {} with no tracked position", instrument),
        }
    }

    /// Reconcile the book with the broker's open positions
    ///
    /// Untracked broker positions are adopted (this also resolves
    /// unreconciled submissions), tracked ones missing at the broker are
    /// closed out as `ExternalClose` with their last floating profit, and
    /// floating profit is refreshed for the rest. Unreconciled slots with no
    /// broker position are released to FLAT. Pending slots are left alone.
    pub fn sync_with_broker(&mut self, broker: &[BrokerPosition], now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport::default();

        let vanished: Vec<Instrument> = self
            .slots
            .iter()
            .filter_map(|(instrument, slot)| match slot {
                Slot::Open(position) if !broker.iter().any(|b| b.ticket == position.ticket) => {
                    Some(instrument.clone())
                }
                _ => None,
            })
            .collect();

        for instrument in vanished {
            if let Some(Slot::Open(position)) = self.slots.remove(&instrument) {
                let exit_price = position.last_price.unwrap_or(position.entry_price);
                let profit = position.floating_profit;
                self.cooldown.record_close(&instrument, now);
                report.vanished.push(position.into_record(
                    exit_price,
                    profit,
                    ExitReason::ExternalClose,
                    now,
                ));
            }
        }

        for record in broker {
            match self.slots.get_mut(&record.instrument) {
                Some(Slot::Open(position)) | Some(Slot::PendingExit(position))
                    if position.ticket == record.ticket =>
                {
                    position.floating_profit = record.profit;
                }
                Some(Slot::Unreconciled { .. }) | None => {
                    let position = Position::from_broker(record, now);
                    self.slots
                        .insert(record.instrument.clone(), Slot::Open(position.clone()));
                    report.adopted.push(position);
                }
                // second ticket on an instrument we already hold, or an order in flight
                Some(_) => {
                    tracing::warn!(
                        instrument = %record.instrument,
                        ticket = record.ticket,
                        "Ignoring extra broker position"
                    );
                }
            }
        }

        let released: Vec<Instrument> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Unreconciled { .. }))
            .map(|(instrument, _)| instrument.clone())
            .collect();
        for instrument in released {
            self.slots.remove(&instrument);
            report.released.push(instrument);
        }

        report
    }
}
