use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Direction, Instrument, Ticket};

/// Gateway-level fill semantics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Fill or kill
    Fok,
    /// Immediate or cancel
    Ioc,
    /// Fill what is possible, leave the rest working
    Return,
}

/// Entry order as handed to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub direction: Direction,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub fill_mode: FillMode,
}

/// Open position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticket: Ticket,
    pub instrument: Instrument,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Floating profit in account currency
    pub profit: f64,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("rejected with code {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("{0}")]
    Unavailable(String),
}

/// Order transmission to the broker/terminal
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Current account equity
    async fn account_equity(&self) -> Result<f64, GatewayError>;

    /// Submit an entry order; returns the ticket on fill
    async fn submit(&self, order: &OrderRequest) -> Result<Ticket, GatewayError>;

    /// Close a position; returns the broker-reported realized profit
    async fn close(&self, ticket: Ticket) -> Result<f64, GatewayError>;

    /// All positions currently open at the broker
    async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError>;
}
