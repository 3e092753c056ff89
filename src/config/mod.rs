//! Run settings
//!
//! Loaded once at startup (defaults, then an optional settings file, then
//! `FXBOT__*` environment variables) and read-only afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::discovery::InstrumentGate;
use crate::error::EngineError;
use crate::execution::gateway::FillMode;
use crate::models::Timeframe;
use crate::strategy::StrategyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub instruments: Vec<String>,
    /// Symbols admitted on top of the built-in allow-list
    pub extra_allowed_instruments: Vec<String>,
    pub timeframe_minutes: u32,
    pub candle_count: usize,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
    pub bridge: BridgeConfig,
    pub persistence: PersistenceConfig,
    pub telegram: TelegramConfig,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instruments: vec![
                "EURUSD.sml".to_string(),
                "GBPUSD.sml".to_string(),
                "USDJPY.sml".to_string(),
            ],
            extra_allowed_instruments: Vec::new(),
            timeframe_minutes: 15,
            candle_count: 200,
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            sizing: SizingConfig::default(),
            execution: ExecutionConfig::default(),
            bridge: BridgeConfig::default(),
            persistence: PersistenceConfig::default(),
            telegram: TelegramConfig::default(),
            log_filter: "fxbot=info".to_string(),
        }
    }
}

/// Protective distance from the entry price
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StopDistance {
    /// Fixed distance in instrument points
    Pips(f64),
    /// Multiple of the ATR of the closed bars
    AtrMultiple(f64),
}

impl StopDistance {
    /// Distance in price units, None when an ATR is needed but missing
    pub fn resolve(&self, point: f64, atr: Option<f64>) -> Option<f64> {
        match *self {
            StopDistance::Pips(pips) => Some(pips * point),
            StopDistance::AtrMultiple(multiple) => atr.map(|atr| atr.max(point) * multiple),
        }
    }

    fn is_positive(&self) -> bool {
        match *self {
            StopDistance::Pips(v) | StopDistance::AtrMultiple(v) => v.is_finite() && v > 0.0,
        }
    }

    fn needs_atr(&self) -> bool {
        matches!(self, StopDistance::AtrMultiple(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade, 0 < f <= 1
    pub risk_fraction: f64,
    pub stop_loss: StopDistance,
    pub take_profit: StopDistance,
    pub max_open_positions: usize,
    pub cooldown_seconds: u64,
    pub loop_delay_seconds: u64,
    /// ATR window used by `atr_multiple` distances
    pub atr_period: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.01,
            stop_loss: StopDistance::Pips(35.0),
            take_profit: StopDistance::Pips(60.0),
            max_open_positions: 2,
            cooldown_seconds: 900,
            loop_delay_seconds: 15,
            atr_period: 14,
        }
    }
}

impl RiskConfig {
    pub fn needs_atr(&self) -> bool {
        self.stop_loss.needs_atr() || self.take_profit.needs_atr()
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds as i64)
    }
}

/// Coarse value of one point per lot, in account currency
///
/// This is a fixed estimate keyed on the instrument name, not a live
/// cross-rate conversion. Sizing is approximate by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipValueTable {
    /// Instruments whose name contains "USD"
    pub usd_quoted: f64,
    pub other: f64,
    pub overrides: HashMap<String, f64>,
}

impl Default for PipValueTable {
    fn default() -> Self {
        Self {
            usd_quoted: 10.0,
            other: 9.0,
            overrides: HashMap::new(),
        }
    }
}

impl PipValueTable {
    pub fn estimate(&self, instrument: &str) -> f64 {
        if let Some(value) = self.overrides.get(instrument) {
            return *value;
        }
        if instrument.contains("USD") {
            self.usd_quoted
        } else {
            self.other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizingConfig {
    pub min_volume: f64,
    pub max_volume: f64,
    /// Lot granularity
    pub volume_step: f64,
    pub pip_value: PipValueTable,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            min_volume: 0.01,
            max_volume: 2.0,
            volume_step: 0.01,
            pip_value: PipValueTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub primary_fill: FillMode,
    /// Tried once, only when the primary mode is rejected
    pub fallback_fill: FillMode,
    /// Deadline for every feed/gateway call
    pub call_timeout_secs: u64,
    /// Book orders locally instead of sending them
    pub paper: bool,
    /// Contract size used by paper profit booking
    pub paper_contract_size: f64,
    /// Paper balance; when unset the live account equity seeds the book
    pub paper_starting_equity: Option<f64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            primary_fill: FillMode::Fok,
            fallback_fill: FillMode::Ioc,
            call_timeout_secs: 10,
            paper: false,
            paper_contract_size: 100_000.0,
            paper_starting_equity: None,
        }
    }
}

impl ExecutionConfig {
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub stats_path: PathBuf,
    pub journal_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            stats_path: PathBuf::from("data/stats.json"),
            journal_path: PathBuf::from("logs/trades.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub commands_enabled: bool,
    pub poll_interval_secs: u64,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            commands_enabled: true,
            poll_interval_secs: 5,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }

    /// Fill missing credentials from the conventional env vars
    fn apply_env_fallback(&mut self) {
        if self.bot_token.is_empty() {
            if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
                self.bot_token = token;
            }
        }
        if self.chat_id.is_empty() {
            if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
                self.chat_id = chat_id;
            }
        }
        if let Ok(flag) = std::env::var("BOT_COMMANDS_ENABLED") {
            self.commands_enabled = flag.eq_ignore_ascii_case("true");
        }
    }
}

impl Settings {
    /// Load settings from an optional file layered under `FXBOT__*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("settings").required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("FXBOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("instruments")
                    .with_list_parse_key("extra_allowed_instruments"),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.telegram.apply_env_fallback();
        Ok(settings)
    }

    /// Switch the detector by name
    ///
    /// Stops still at the outgoing detector's defaults move to the new
    /// detector's defaults; stops set explicitly in the settings are kept.
    pub fn select_strategy(&mut self, name: &str) -> Result<(), EngineError> {
        let strategy = StrategyConfig::from_name(name)
            .ok_or_else(|| EngineError::Config(format!("unknown strategy '{}'", name)))?;
        if (self.risk.stop_loss, self.risk.take_profit) == self.strategy.default_stops() {
            let (stop_loss, take_profit) = strategy.default_stops();
            self.risk.stop_loss = stop_loss;
            self.risk.take_profit = take_profit;
        }
        self.strategy = strategy;
        Ok(())
    }

    pub fn timeframe(&self) -> Timeframe {
        Timeframe::from_minutes(self.timeframe_minutes).unwrap_or_else(|| {
            tracing::warn!(
                "Unsupported timeframe {}m, falling back to M15",
                self.timeframe_minutes
            );
            Timeframe::M15
        })
    }

    pub fn instrument_gate(&self) -> InstrumentGate {
        InstrumentGate::default().with_extra(self.extra_allowed_instruments.iter().cloned())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let risk = &self.risk;
        if !(risk.risk_fraction > 0.0 && risk.risk_fraction <= 1.0) {
            return Err(EngineError::Config(format!(
                "risk_fraction must be in (0, 1], got {}",
                risk.risk_fraction
            )));
        }
        if risk.max_open_positions == 0 {
            return Err(EngineError::Config("max_open_positions must be at least 1".into()));
        }
        if !risk.stop_loss.is_positive() || !risk.take_profit.is_positive() {
            return Err(EngineError::Config(
                "stop_loss and take_profit distances must be positive".into(),
            ));
        }
        if risk.needs_atr() && risk.atr_period == 0 {
            return Err(EngineError::Config("atr_period must be positive".into()));
        }

        let sizing = &self.sizing;
        if !(sizing.min_volume > 0.0 && sizing.min_volume <= sizing.max_volume) {
            return Err(EngineError::Config(format!(
                "volume bounds invalid: min {} max {}",
                sizing.min_volume, sizing.max_volume
            )));
        }
        if sizing.volume_step <= 0.0 {
            return Err(EngineError::Config("volume_step must be positive".into()));
        }
        if let Some(equity) = self.execution.paper_starting_equity {
            if !(equity.is_finite() && equity > 0.0) {
                return Err(EngineError::Config(format!(
                    "paper_starting_equity must be positive, got {}",
                    equity
                )));
            }
        }

        if self.candle_count < self.strategy.min_candles_required() {
            return Err(EngineError::Config(format!(
                "candle_count {} is below the {} bars the strategy needs",
                self.candle_count,
                self.strategy.min_candles_required()
            )));
        }

        self.strategy.validate()?;

        if self.instrument_gate().filter(&self.instruments).is_empty() {
            return Err(EngineError::Startup(
                "no allowed instruments configured".into(),
            ));
        }

        Ok(())
    }
}
