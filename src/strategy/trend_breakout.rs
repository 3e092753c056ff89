use serde::{Deserialize, Serialize};

use super::Strategy;
use crate::indicators::{calculate_atr, calculate_ema, highest_high, lowest_low};
use crate::models::{closed_bars, Candle, Quote, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendBreakoutConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub atr_period: usize,
    /// Bars in the rolling extreme, not counting the breakout bar
    pub breakout_window: usize,
}

impl Default for TrendBreakoutConfig {
    fn default() -> Self {
        Self {
            fast_period: 20,
            slow_period: 50,
            atr_period: 14,
            breakout_window: 20,
        }
    }
}

/// Trend-confirmed breakout
///
/// Trend comes from a fast/slow EMA cross over closes. A BUY needs an up
/// trend, a last closed bar closing above the prior rolling high, and a live
/// ask already beyond that bar's high. SELL mirrors it.
#[derive(Debug, Clone)]
pub struct TrendBreakoutStrategy {
    config: TrendBreakoutConfig,
}

impl TrendBreakoutStrategy {
    pub fn new(config: TrendBreakoutConfig) -> Self {
        Self { config }
    }

    fn closed_bars_required(&self) -> usize {
        self.config
            .slow_period
            .max(self.config.fast_period)
            .max(self.config.atr_period + 1)
            .max(self.config.breakout_window + 1)
    }
}

impl Default for TrendBreakoutStrategy {
    fn default() -> Self {
        Self::new(TrendBreakoutConfig::default())
    }
}

impl Strategy for TrendBreakoutStrategy {
    fn evaluate(&self, instrument: &str, candles: &[Candle], quote: &Quote, _point: f64) -> Signal {
        if !quote.is_usable() {
            return Signal::Hold;
        }

        let closed = closed_bars(candles);
        if closed.len() < self.closed_bars_required() {
            tracing::debug!(
                instrument = %instrument,
                "Insufficient history: {} closed bars, need {}",
                closed.len(),
                self.closed_bars_required()
            );
            return Signal::Hold;
        }

        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        let (Some(fast), Some(slow), Some(atr)) = (
            calculate_ema(&closes, self.config.fast_period),
            calculate_ema(&closes, self.config.slow_period),
            calculate_atr(closed, self.config.atr_period),
        ) else {
            return Signal::Hold;
        };

        let last = &closed[closed.len() - 1];
        let prior = &closed[closed.len() - 1 - self.config.breakout_window..closed.len() - 1];
        let (Some(rolling_high), Some(rolling_low)) = (highest_high(prior), lowest_low(prior)) else {
            return Signal::Hold;
        };

        tracing::debug!(
            instrument = %instrument,
            fast_ema = fast,
            slow_ema = slow,
            atr = atr,
            rolling_high = rolling_high,
            rolling_low = rolling_low,
            "Trend breakout inputs"
        );

        if fast > slow && last.close > rolling_high && quote.ask > last.high {
            tracing::info!(
                instrument = %instrument,
                "BUY breakout, close {:.5} > {:.5}, ask {:.5} > bar high {:.5}",
                last.close,
                rolling_high,
                quote.ask,
                last.high
            );
            return Signal::Buy;
        }

        if fast < slow && last.close < rolling_low && quote.bid < last.low {
            tracing::info!(
                instrument = %instrument,
                "SELL breakout, close {:.5} < {:.5}, bid {:.5} < bar low {:.5}",
                last.close,
                rolling_low,
                quote.bid,
                last.low
            );
            return Signal::Sell;
        }

        Signal::Hold
    }

    fn name(&self) -> &str {
        "trend_breakout"
    }

    fn min_candles_required(&self) -> usize {
        self.closed_bars_required() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::bars;

    const POINT: f64 = 0.00001;

    /// `n` closed bars stepping by `step` plus one forming bar
    fn trending(n: usize, step: f64) -> Vec<Candle> {
        let hlc: Vec<(f64, f64, f64)> = (0..=n)
            .map(|i| {
                let close = 1.1000 + step * i as f64;
                (close + 0.00005, close - 0.00005, close)
            })
            .collect();
        bars(&hlc)
    }

    #[test]
    fn test_buy_on_uptrend_breakout() {
        let candles = trending(60, 0.0001);
        let last = &candles[candles.len() - 2];
        let quote = Quote::new(last.high + 0.00001, last.high + 0.00003);

        let signal = TrendBreakoutStrategy::default().evaluate("EURUSD", &candles, &quote, POINT);
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_buy_needs_ask_beyond_bar_high() {
        let candles = trending(60, 0.0001);
        let last = &candles[candles.len() - 2];
        let quote = Quote::new(last.close, last.high - 0.00001);

        let signal = TrendBreakoutStrategy::default().evaluate("EURUSD", &candles, &quote, POINT);
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_sell_on_downtrend_breakout() {
        let candles = trending(60, -0.0001);
        let last = &candles[candles.len() - 2];
        let quote = Quote::new(last.low - 0.00003, last.low - 0.00001);

        let signal = TrendBreakoutStrategy::default().evaluate("EURUSD", &candles, &quote, POINT);
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_no_breakout_inside_range() {
        let mut candles = trending(60, 0.0001);
        // pull the last closed bar back inside the prior range
        let idx = candles.len() - 2;
        candles[idx].close = 1.1040;
        candles[idx].high = 1.1041;
        candles[idx].low = 1.1039;
        let quote = Quote::new(1.1045, 1.1046);

        let signal = TrendBreakoutStrategy::default().evaluate("EURUSD", &candles, &quote, POINT);
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_insufficient_history_holds() {
        let candles = trending(30, 0.0001);
        let quote = Quote::new(2.0, 2.0001);

        let strategy = TrendBreakoutStrategy::default();
        assert_eq!(strategy.evaluate("EURUSD", &candles, &quote, POINT), Signal::Hold);
        assert_eq!(strategy.min_candles_required(), 51);
    }
}
