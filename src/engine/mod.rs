//! Decision loop
//!
//! One task runs every cycle strictly in sequence: drain control commands,
//! reconcile with the broker, check exits for every open position, then scan
//! instruments for entries. Exits always finish before entries so a slot
//! freed this cycle is visible to the same cycle's scan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::control::{Command, CommandResponse, EngineHandle, PositionView, StatusReport};
use crate::error::{bounded, feed_error, EngineError};
use crate::execution::{
    ExecutionAction, Executor, FillMode, MarketFeed, OrderGateway, OrderRequest, Position,
    PositionManager,
};
use crate::indicators::calculate_atr;
use crate::models::{
    closed_bars, Candle, Direction, ExitReason, Instrument, Quote, Timeframe, TradeRecord,
};
use crate::notify::{Event, NotificationSink};
use crate::persistence::{StatsLedger, TradeJournal};
use crate::risk::{CooldownTracker, PositionSizer};
use crate::strategy::Strategy;

/// How long a single notification may take before it is dropped
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of an entry submission after the fallback retry
enum Submission {
    Filled { ticket: u64, fill_mode: FillMode },
    Rejected(EngineError),
    Unknown(EngineError),
}

pub struct Engine {
    settings: Settings,
    instruments: Vec<Instrument>,
    feed: Arc<dyn MarketFeed>,
    gateway: Arc<dyn OrderGateway>,
    sink: Arc<dyn NotificationSink>,
    strategy: Box<dyn Strategy>,
    sizer: PositionSizer,
    positions: PositionManager,
    executor: Executor,
    ledger: StatsLedger,
    journal: TradeJournal,
    handle: EngineHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    equity: f64,
    timeframe: Timeframe,
    last_cycle: Option<DateTime<Utc>>,
}

impl Engine {
    /// Validate settings, connect, restore state and announce the start
    ///
    /// Fails only on fatal conditions: invalid settings, no allowed
    /// instrument, or a gateway that cannot report account equity.
    pub async fn start(
        settings: Settings,
        feed: Arc<dyn MarketFeed>,
        gateway: Arc<dyn OrderGateway>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<(Engine, EngineHandle), EngineError> {
        settings.validate()?;

        let instruments = settings.instrument_gate().filter(&settings.instruments);
        if instruments.is_empty() {
            return Err(EngineError::Startup("no allowed instruments configured".into()));
        }

        let timeout = settings.execution.call_timeout();
        let equity = bounded("account_equity", timeout, gateway.account_equity())
            .await
            .map_err(|e| EngineError::Startup(format!("cannot reach order gateway: {}", e)))?;

        let ledger = StatsLedger::load(&settings.persistence.stats_path);
        let journal = TradeJournal::new(&settings.persistence.journal_path);
        let positions = PositionManager::new(
            settings.risk.max_open_positions,
            CooldownTracker::new(settings.risk.cooldown()),
        );
        let (handle, commands) = EngineHandle::new();

        let mut engine = Engine {
            strategy: settings.strategy.build(),
            sizer: PositionSizer::from(&settings.sizing),
            instruments,
            feed,
            gateway,
            sink,
            positions,
            executor: Executor::new(),
            ledger,
            journal,
            handle: handle.clone(),
            commands,
            equity,
            timeframe: settings.timeframe(),
            last_cycle: None,
            settings,
        };

        tracing::info!("🚀 fxbot starting");
        tracing::info!("  Equity: ${:.2}", engine.equity);
        tracing::info!("  Strategy: {}", engine.strategy.name());
        tracing::info!("  Timeframe: {}", engine.timeframe);
        tracing::info!("  Max open positions: {}", engine.settings.risk.max_open_positions);
        for instrument in &engine.instruments {
            tracing::info!("    - {}", instrument);
        }

        engine.reconcile(Utc::now()).await;
        engine.publish_status().await;

        engine
            .emit(Event::Started {
                equity: engine.equity,
                strategy: engine.strategy.name().to_string(),
                instruments: engine.instruments.clone(),
                risk: engine.settings.risk.clone(),
                paper: engine.settings.execution.paper,
            })
            .await;

        Ok((engine, handle))
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    /// Bar timeframe resolved once at startup
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn ledger(&self) -> &StatsLedger {
        &self.ledger
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Run cycles until a stop is requested, then shut down
    pub async fn run(mut self) {
        let delay = Duration::from_secs(self.settings.risk.loop_delay_seconds);
        while self.handle.is_running() {
            self.run_cycle_at(Utc::now()).await;
            if !self.handle.is_running() {
                break;
            }
            self.handle.sleep(delay).await;
        }
        self.shutdown().await;
    }

    /// Answer outstanding commands, flush persistence and announce the stop
    pub async fn shutdown(mut self) {
        self.handle.stop();
        self.drain_commands().await;
        self.retry_persistence();
        self.publish_status().await;
        self.emit(Event::Stopped).await;
        tracing::info!("🛑 fxbot stopped");
    }

    /// One full decision cycle at `now`
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) {
        tracing::debug!("💹 Cycle at {}", now.format("%H:%M:%S"));

        self.drain_commands().await;
        self.retry_persistence();
        self.reconcile(now).await;
        self.refresh_equity().await;

        self.check_exits(now).await;

        if self.executor.is_paused() {
            tracing::debug!("Entries paused, skipping scan");
        } else {
            self.scan_entries(now).await;
        }

        self.last_cycle = Some(now);
        self.publish_status().await;
    }

    /// Build the data answer for a control command
    pub async fn handle_command(&mut self, command: Command) -> CommandResponse {
        match command {
            Command::Status => CommandResponse::Status(self.status_report()),
            Command::ListPositions => CommandResponse::Positions(self.position_views()),
            Command::Stop => {
                self.handle.stop();
                CommandResponse::Stopping
            }
            Command::Pause => {
                self.executor.set_paused(true);
                self.handle.set_paused(true);
                tracing::info!("⏸ Entries paused");
                CommandResponse::Paused
            }
            Command::Resume => {
                self.executor.set_paused(false);
                self.handle.set_paused(false);
                tracing::info!("▶️ Entries resumed");
                CommandResponse::Resumed
            }
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let response = self.handle_command(command).await;
            self.emit(Event::Response(response)).await;
        }
    }

    pub fn status_report(&self) -> StatusReport {
        let stats = self.ledger.stats();
        StatusReport {
            strategy: self.strategy.name().to_string(),
            equity: Some(self.equity),
            win_rate: stats.win_rate,
            total_profit: stats.total_profit,
            trade_count: stats.trade_count(),
            open_positions: self.positions.open_positions().len(),
            paused: self.executor.is_paused(),
            last_cycle: self.last_cycle,
        }
    }

    pub fn position_views(&self) -> Vec<PositionView> {
        self.instruments_with_positions()
            .iter()
            .filter_map(|instrument| {
                let slot = self.positions.slot(instrument)?;
                slot.position().map(|p| PositionView::from_slot(p, slot))
            })
            .collect()
    }

    fn instruments_with_positions(&self) -> Vec<Instrument> {
        self.positions
            .open_positions()
            .iter()
            .map(|p| p.instrument.clone())
            .collect()
    }

    async fn publish_status(&self) {
        self.handle.publish_status(self.status_report()).await;
    }

    async fn emit(&self, event: Event) {
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.sink.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Notification failed: {}", e),
            Err(_) => tracing::warn!("Notification timed out after {:?}", NOTIFY_TIMEOUT),
        }
    }

    async fn report_error(&self, message: String) {
        tracing::error!("{}", message);
        self.emit(Event::Error { message }).await;
    }

    fn call_timeout(&self) -> Duration {
        self.settings.execution.call_timeout()
    }

    /// Retry stats/journal writes that failed earlier
    fn retry_persistence(&mut self) {
        if self.ledger.is_dirty() {
            if let Err(e) = self.ledger.flush() {
                tracing::warn!("Stats snapshot still not written: {}", e);
            }
        }
        if self.journal.pending() > 0 {
            if let Err(e) = self.journal.flush() {
                tracing::warn!("{} journal rows still pending: {}", self.journal.pending(), e);
            }
        }
    }

    /// Persist a closed trade; failures keep memory state and retry later
    fn record_trade(&mut self, trade: &TradeRecord) {
        if let Err(e) = self.journal.append(trade) {
            tracing::warn!(ticket = trade.ticket, "Journal write failed, will retry: {}", e);
        }
        if let Err(e) = self.ledger.record_at(trade.clone(), trade.closed_at) {
            tracing::warn!(ticket = trade.ticket, "Stats write failed, will retry: {}", e);
        }
    }

    async fn refresh_equity(&mut self) {
        match bounded("account_equity", self.call_timeout(), self.gateway.account_equity()).await {
            Ok(equity) => self.equity = equity,
            Err(e) => tracing::warn!("Equity refresh failed, keeping {:.2}: {}", self.equity, e),
        }
    }

    /// Match the book against the broker's open positions
    async fn reconcile(&mut self, now: DateTime<Utc>) {
        let broker = match bounded(
            "list_open_positions",
            self.call_timeout(),
            self.gateway.list_open_positions(),
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!("Broker sync skipped: {}", e);
                return;
            }
        };

        let relevant: Vec<_> = broker
            .into_iter()
            .filter(|p| self.instruments.contains(&p.instrument))
            .collect();
        let report = self.positions.sync_with_broker(&relevant, now);

        for position in &report.adopted {
            tracing::info!(
                instrument = %position.instrument,
                ticket = position.ticket,
                "Adopted broker position {} {:.2} @ {:.5}",
                position.direction,
                position.volume,
                position.entry_price
            );
        }
        for instrument in &report.released {
            tracing::info!(instrument = %instrument, "Unconfirmed submission not at broker, back to FLAT");
        }
        for trade in report.vanished {
            tracing::info!(
                instrument = %trade.instrument,
                ticket = trade.ticket,
                "Position closed at broker, profit {:.2}",
                trade.realized_profit
            );
            self.record_trade(&trade);
            self.emit(Event::Closed {
                instrument: trade.instrument.clone(),
                profit: trade.realized_profit,
                reason: trade.close_reason,
                ticket: trade.ticket,
            })
            .await;
        }
    }

    async fn check_exits(&mut self, now: DateTime<Utc>) {
        for instrument in self.instruments_with_positions() {
            let quote = match self.fetch_quote(&instrument).await {
                Ok(quote) => quote,
                Err(e) => {
                    tracing::warn!(
                        instrument = %instrument,
                        "No usable quote, position stays open: {}",
                        e
                    );
                    continue;
                }
            };

            if let Some((reason, price)) = self.positions.check_exit(&instrument, &quote) {
                self.close_position(&instrument, reason, price, now).await;
            }
        }
    }

    async fn close_position(
        &mut self,
        instrument: &str,
        reason: ExitReason,
        price: f64,
        now: DateTime<Utc>,
    ) {
        let Some(ticket) = self.positions.begin_exit(instrument) else {
            return;
        };
        tracing::info!(
            instrument = %instrument,
            ticket = ticket,
            "  → Closing ({}) @ {:.5}",
            reason,
            price
        );

        match bounded("close", self.call_timeout(), self.gateway.close(ticket)).await {
            Ok(profit) => match self
                .positions
                .exit_completed(instrument, price, profit, reason, now)
            {
                Ok(trade) => {
                    tracing::info!(
                        instrument = %instrument,
                        ticket = ticket,
                        "  ✓ Closed, profit {:.2}",
                        profit
                    );
                    self.record_trade(&trade);
                    self.emit(Event::Closed {
                        instrument: instrument.to_string(),
                        profit,
                        reason,
                        ticket,
                    })
                    .await;
                }
                Err(e) => tracing::error!("{}", e),
            },
            Err(e) => {
                self.positions.exit_failed(instrument);
                self.report_error(format!(
                    "Close of {} #{} failed, position stays open: {}",
                    instrument, ticket, e
                ))
                .await;
            }
        }
    }

    async fn fetch_quote(&self, instrument: &str) -> Result<Quote, EngineError> {
        let quote = bounded("quote", self.call_timeout(), async {
            self.feed.quote(instrument).await.map_err(|e| feed_error(instrument, e))
        })
        .await?;

        if !quote.is_usable() {
            return Err(EngineError::MarketUnavailable {
                instrument: instrument.to_string(),
                reason: format!("unusable quote {}/{}", quote.bid, quote.ask),
            });
        }
        Ok(quote)
    }

    async fn fetch_market(&self, instrument: &str) -> Result<(f64, Vec<Candle>, Quote), EngineError> {
        let timeout = self.call_timeout();
        let point = bounded("point", timeout, async {
            self.feed.point(instrument).await.map_err(|e| feed_error(instrument, e))
        })
        .await?;
        let candles = bounded("candles", timeout, async {
            self.feed
                .candles(instrument, self.timeframe, self.settings.candle_count)
                .await
                .map_err(|e| feed_error(instrument, e))
        })
        .await?;
        let quote = self.fetch_quote(instrument).await?;
        Ok((point, candles, quote))
    }

    async fn scan_entries(&mut self, now: DateTime<Utc>) {
        for instrument in self.instruments.clone() {
            if let Some(decision) = self.executor.check_entry(&self.positions, &instrument, now) {
                tracing::debug!(instrument = %instrument, "  Skip: {}", decision.reason);
                continue;
            }

            let (point, candles, quote) = match self.fetch_market(&instrument).await {
                Ok(market) => market,
                Err(e) => {
                    tracing::warn!(instrument = %instrument, "  ✗ Market data: {}", e);
                    continue;
                }
            };

            let signal = self.strategy.evaluate(&instrument, &candles, &quote, point);
            let decision = self.executor.process_signal(&self.positions, &signal, &instrument, now);
            tracing::debug!(
                instrument = %instrument,
                "  Signal: {:?}, decision: {:?} - {}",
                signal,
                decision.action,
                decision.reason
            );

            if let ExecutionAction::Enter(direction) = decision.action {
                self.open_position(&instrument, direction, &candles, &quote, point, now)
                    .await;
            }
        }
    }

    async fn open_position(
        &mut self,
        instrument: &str,
        direction: Direction,
        candles: &[Candle],
        quote: &Quote,
        point: f64,
        now: DateTime<Utc>,
    ) {
        let risk = &self.settings.risk;
        let atr = if risk.needs_atr() {
            calculate_atr(closed_bars(candles), risk.atr_period)
        } else {
            None
        };
        let (Some(sl_distance), Some(tp_distance)) = (
            risk.stop_loss.resolve(point, atr),
            risk.take_profit.resolve(point, atr),
        ) else {
            tracing::warn!(instrument = %instrument, "  ✗ Not enough bars for ATR stops");
            return;
        };

        let price = direction.entry_price(quote);
        let sign = direction.sign();
        let stop_loss = price - sign * sl_distance;
        let take_profit = price + sign * tp_distance;
        let pip_value = self.settings.sizing.pip_value.estimate(instrument);
        let volume = self
            .sizer
            .size(self.equity, risk.risk_fraction, sl_distance / point, pip_value);

        if let Err(e) = self.positions.begin_entry(instrument, direction, now) {
            tracing::warn!("{}", e);
            return;
        }

        let mut order = OrderRequest {
            instrument: instrument.to_string(),
            direction,
            volume,
            price,
            stop_loss,
            take_profit,
            fill_mode: self.settings.execution.primary_fill,
        };
        tracing::info!(
            instrument = %instrument,
            volume = volume,
            "  → {} @ {:.5} SL {:.5} TP {:.5}",
            direction,
            price,
            stop_loss,
            take_profit
        );

        match self.submit_with_fallback(&mut order).await {
            Submission::Filled { ticket, fill_mode } => {
                let position = Position {
                    instrument: instrument.to_string(),
                    direction,
                    ticket,
                    volume,
                    entry_price: price,
                    stop_loss,
                    take_profit,
                    opened_at: now,
                    floating_profit: 0.0,
                    last_price: None,
                };
                if let Err(e) = self.positions.entry_filled(position) {
                    tracing::error!("{}", e);
                    return;
                }
                tracing::info!(
                    instrument = %instrument,
                    ticket = ticket,
                    "  ✓ Opened {} {:.2} ({:?})",
                    direction,
                    volume,
                    fill_mode
                );
                self.emit(Event::Opened {
                    instrument: instrument.to_string(),
                    direction,
                    price,
                    stop_loss,
                    take_profit,
                    ticket,
                    volume,
                })
                .await;
            }
            Submission::Rejected(e) => {
                self.positions.entry_failed(instrument);
                self.report_error(format!("Entry {} {} failed: {}", direction, instrument, e))
                    .await;
            }
            Submission::Unknown(e) => {
                self.positions.entry_unknown(instrument, now);
                self.report_error(format!(
                    "Entry {} {} unconfirmed, reconciling next cycle: {}",
                    direction, instrument, e
                ))
                .await;
            }
        }
    }

    /// Submit with the primary fill mode, retrying once with the fallback
    /// mode only when the primary is rejected
    async fn submit_with_fallback(&self, order: &mut OrderRequest) -> Submission {
        let timeout = self.call_timeout();

        let first = bounded("submit", timeout, self.gateway.submit(order)).await;
        let rejection = match first {
            Ok(ticket) => {
                return Submission::Filled {
                    ticket,
                    fill_mode: order.fill_mode,
                }
            }
            Err(e @ EngineError::OrderRejected { .. }) => e,
            Err(e) => return Submission::Unknown(e),
        };

        let fallback = self.settings.execution.fallback_fill;
        tracing::warn!(
            instrument = %order.instrument,
            "  ✗ {:?} rejected ({}), retrying with {:?}",
            order.fill_mode,
            rejection,
            fallback
        );
        order.fill_mode = fallback;

        match bounded("submit", timeout, self.gateway.submit(order)).await {
            Ok(ticket) => Submission::Filled {
                ticket,
                fill_mode: fallback,
            },
            Err(e @ EngineError::OrderRejected { .. }) => Submission::Rejected(e),
            Err(e) => Submission::Unknown(e),
        }
    }
}
