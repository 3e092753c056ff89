// Notification sinks
pub mod telegram;

pub use telegram::TelegramClient;

use async_trait::async_trait;

use crate::config::RiskConfig;
use crate::control::CommandResponse;
use crate::models::{Direction, ExitReason, Instrument, Ticket};

/// Something the engine wants reported, as data
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started {
        equity: f64,
        strategy: String,
        instruments: Vec<Instrument>,
        risk: RiskConfig,
        paper: bool,
    },
    Opened {
        instrument: Instrument,
        direction: Direction,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
        ticket: Ticket,
        volume: f64,
    },
    Closed {
        instrument: Instrument,
        profit: f64,
        reason: ExitReason,
        ticket: Ticket,
    },
    Error {
        message: String,
    },
    Stopped,
    Response(CommandResponse),
}

/// Destination for engine events
///
/// Delivery is best effort; the engine logs a failed send and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &Event) -> anyhow::Result<()>;
}

/// Sink that only writes events to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Started {
                equity,
                strategy,
                instruments,
                paper,
                ..
            } => tracing::info!(
                "Engine started: equity {:.2}, strategy {}, paper {}, instruments {}",
                equity,
                strategy,
                paper,
                instruments.join(", ")
            ),
            Event::Opened {
                instrument,
                direction,
                price,
                ticket,
                volume,
                ..
            } => tracing::info!(
                instrument = %instrument,
                ticket = ticket,
                "Opened {} {:.2} @ {:.5}",
                direction,
                volume,
                price
            ),
            Event::Closed {
                instrument,
                profit,
                reason,
                ticket,
            } => tracing::info!(
                instrument = %instrument,
                ticket = ticket,
                "Closed ({}) profit {:.2}",
                reason,
                profit
            ),
            Event::Error { message } => tracing::error!("{}", message),
            Event::Stopped => tracing::info!("Engine stopped"),
            Event::Response(response) => tracing::info!("Command response: {:?}", response),
        }
        Ok(())
    }
}
