//! Remote control: commands, the shared engine handle and the poll loop
//!
//! The decision loop is the only writer of trading state. The control side
//! can flip the running flag directly; everything else goes through the
//! command channel, drained once per cycle.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, RwLock};

use crate::execution::{Position, Slot};
use crate::models::{Direction, Instrument, Ticket};
use crate::notify::{Event, NotificationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    ListPositions,
    Stop,
    Pause,
    Resume,
}

impl FromStr for Command {
    type Err = String;

    /// Parse chat text such as `/status` or `/posiciones@my_bot`
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let word = text.split_whitespace().next().unwrap_or("");
        let word = word.split('@').next().unwrap_or(word);
        match word.trim_start_matches('/').to_lowercase().as_str() {
            "status" | "start" => Ok(Command::Status),
            "positions" | "posiciones" => Ok(Command::ListPositions),
            "stop" => Ok(Command::Stop),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            _ => Err(text.trim().to_string()),
        }
    }
}

/// Point-in-time engine summary
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub strategy: String,
    pub equity: Option<f64>,
    pub win_rate: f64,
    pub total_profit: f64,
    pub trade_count: usize,
    pub open_positions: usize,
    pub paused: bool,
    pub last_cycle: Option<DateTime<Utc>>,
}

/// One row of the open positions report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionView {
    pub instrument: Instrument,
    pub direction: Direction,
    pub ticket: Ticket,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub floating_profit: f64,
    pub state: String,
}

impl PositionView {
    pub fn from_slot(position: &Position, slot: &Slot) -> Self {
        Self {
            instrument: position.instrument.clone(),
            direction: position.direction,
            ticket: position.ticket,
            volume: position.volume,
            entry_price: position.entry_price,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            floating_profit: position.floating_profit,
            state: slot.label().to_string(),
        }
    }
}

/// Data answer to a [`Command`]; rendering is up to the sink
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Status(StatusReport),
    Positions(Vec<PositionView>),
    Stopping,
    Paused,
    Resumed,
    /// Reply to text that is not a known command
    Help,
    /// Commands are switched off
    Disabled,
}

struct Shared {
    running: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
    commands: mpsc::UnboundedSender<Command>,
    status: RwLock<StatusReport>,
}

/// Cloneable handle shared by the decision loop and its controllers
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// New handle plus the receiving end the decision loop drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(true),
                paused: AtomicBool::new(false),
                wake: Notify::new(),
                commands: tx,
                status: RwLock::new(StatusReport::default()),
            }),
        };
        (handle, rx)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to finish its current cycle and exit
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
    }

    /// Queue a command for the next cycle; `Stop` also takes effect at once
    pub fn send(&self, command: Command) {
        if command == Command::Stop {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        if self.shared.commands.send(command).is_err() {
            tracing::warn!("Engine gone, dropping {:?}", command);
        }
        self.shared.wake.notify_one();
    }

    /// Sleep for `delay` unless woken by a command or stop request
    pub async fn sleep(&self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shared.wake.notified() => {}
        }
    }

    pub async fn status(&self) -> StatusReport {
        self.shared.status.read().await.clone()
    }

    pub(crate) async fn publish_status(&self, report: StatusReport) {
        *self.shared.status.write().await = report;
    }
}

/// Inbound command text, e.g. a chat API
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Messages received since the last call
    async fn poll(&self) -> anyhow::Result<Vec<String>>;
}

/// Poll `source` until the engine stops, forwarding commands to it
///
/// Unknown text is answered with the help reply. With commands disabled every
/// message gets the disabled reply and nothing reaches the engine.
pub async fn run_control_loop(
    source: Arc<dyn CommandSource>,
    sink: Arc<dyn NotificationSink>,
    handle: EngineHandle,
    interval: Duration,
    enabled: bool,
) {
    tracing::info!("Control loop started (commands enabled: {})", enabled);

    while handle.is_running() {
        match source.poll().await {
            Ok(messages) => {
                for text in messages {
                    let reply = if !enabled {
                        Some(CommandResponse::Disabled)
                    } else {
                        match text.parse::<Command>() {
                            Ok(command) => {
                                tracing::info!("Received command {:?}", command);
                                handle.send(command);
                                None
                            }
                            Err(unknown) => {
                                tracing::debug!("Unknown command text: {}", unknown);
                                Some(CommandResponse::Help)
                            }
                        }
                    };
                    if let Some(reply) = reply {
                        if let Err(e) = sink.notify(&Event::Response(reply)).await {
                            tracing::warn!("Failed to answer command: {}", e);
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Command poll failed: {}", e),
        }

        handle.sleep(interval).await;
    }

    tracing::info!("Control loop stopped");
}
