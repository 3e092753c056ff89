// Breakout detectors
pub mod range_breakout;
pub mod trend_breakout;

pub use range_breakout::{RangeBreakoutConfig, RangeBreakoutStrategy};
pub use trend_breakout::{TrendBreakoutConfig, TrendBreakoutStrategy};

use serde::{Deserialize, Serialize};

use crate::config::StopDistance;
use crate::error::EngineError;
use crate::models::{Candle, Quote, Signal};

/// Base trait for all signal detectors
///
/// `candles` is the raw feed window, oldest first, whose last bar may still be
/// forming. Implementations only read closed bars from it. Too little history
/// is a `Hold`, never an error.
pub trait Strategy: Send + Sync {
    /// Evaluate one instrument against the live quote
    fn evaluate(&self, instrument: &str, candles: &[Candle], quote: &Quote, point: f64) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles (forming bar included) needed for a non-trivial answer
    fn min_candles_required(&self) -> usize;
}

/// Detector selection, tagged by `kind` in the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    RangeBreakout(RangeBreakoutConfig),
    TrendBreakout(TrendBreakoutConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::RangeBreakout(RangeBreakoutConfig::default())
    }
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::RangeBreakout(config) => {
                Box::new(RangeBreakoutStrategy::new(config.clone()))
            }
            StrategyConfig::TrendBreakout(config) => {
                Box::new(TrendBreakoutStrategy::new(config.clone()))
            }
        }
    }

    pub fn min_candles_required(&self) -> usize {
        self.build().min_candles_required()
    }

    /// Pick a detector by name, keeping its default parameters
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "range_breakout" | "range-breakout" => Some(Self::RangeBreakout(Default::default())),
            "trend_breakout" | "trend-breakout" => Some(Self::TrendBreakout(Default::default())),
            _ => None,
        }
    }

    /// Stop and target distances the detector is tuned for
    pub fn default_stops(&self) -> (StopDistance, StopDistance) {
        match self {
            StrategyConfig::RangeBreakout(_) => (StopDistance::Pips(35.0), StopDistance::Pips(60.0)),
            StrategyConfig::TrendBreakout(_) => {
                (StopDistance::AtrMultiple(1.2), StopDistance::AtrMultiple(2.5))
            }
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            StrategyConfig::RangeBreakout(config) => {
                if !(config.pips.is_finite() && config.pips >= 0.0) {
                    return Err(EngineError::Config("range_breakout.pips must be >= 0".into()));
                }
                if config.dead_market_filter && config.dead_market_bars == 0 {
                    return Err(EngineError::Config(
                        "range_breakout.dead_market_bars must be positive".into(),
                    ));
                }
            }
            StrategyConfig::TrendBreakout(config) => {
                if config.fast_period == 0 || config.fast_period >= config.slow_period {
                    return Err(EngineError::Config(format!(
                        "trend_breakout needs 0 < fast_period < slow_period, got {}/{}",
                        config.fast_period, config.slow_period
                    )));
                }
                if config.atr_period == 0 || config.breakout_window == 0 {
                    return Err(EngineError::Config(
                        "trend_breakout atr_period and breakout_window must be positive".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};

    use crate::models::Candle;

    /// Bars 15 minutes apart from (high, low, close) triples
    pub fn bars(hlc: &[(f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2025, 11, 24, 0, 0, 0).unwrap();
        hlc.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Candle {
                open_time: start + Duration::minutes(15 * i as i64),
                open: close,
                high,
                low,
                close,
                volume: 100.0,
            })
            .collect()
    }
}
