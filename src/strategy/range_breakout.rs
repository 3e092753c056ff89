use serde::{Deserialize, Serialize};

use super::Strategy;
use crate::indicators::range_in_points;
use crate::models::{closed_bars, Candle, Quote, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeBreakoutConfig {
    /// Offset from the previous bar's extremes, in points
    pub pips: f64,
    /// Skip instruments whose recent range is too narrow
    pub dead_market_filter: bool,
    pub dead_market_bars: usize,
    pub dead_market_min_points: f64,
}

impl Default for RangeBreakoutConfig {
    fn default() -> Self {
        Self {
            pips: 1.4,
            dead_market_filter: true,
            dead_market_bars: 20,
            dead_market_min_points: 48.0,
        }
    }
}

/// Breakout against the previous closed bar
///
/// SELL once the bid climbs `pips` points above the previous low, BUY once the
/// ask falls `pips` points below the previous high. SELL is checked first.
#[derive(Debug, Clone)]
pub struct RangeBreakoutStrategy {
    config: RangeBreakoutConfig,
}

impl RangeBreakoutStrategy {
    pub fn new(config: RangeBreakoutConfig) -> Self {
        Self { config }
    }

    /// True when the recent closed-bar range is below the floor
    fn is_dead_market(&self, instrument: &str, closed: &[Candle], point: f64) -> bool {
        let bars = self.config.dead_market_bars;
        if closed.len() < bars {
            return true;
        }

        match range_in_points(&closed[closed.len() - bars..], point) {
            Some(range) if range >= self.config.dead_market_min_points => false,
            Some(range) => {
                tracing::info!(
                    instrument = %instrument,
                    range_points = range,
                    floor = self.config.dead_market_min_points,
                    "Dead market, only {:.1} points over {} bars",
                    range,
                    bars
                );
                true
            }
            None => true,
        }
    }
}

impl Default for RangeBreakoutStrategy {
    fn default() -> Self {
        Self::new(RangeBreakoutConfig::default())
    }
}

impl Strategy for RangeBreakoutStrategy {
    fn evaluate(&self, instrument: &str, candles: &[Candle], quote: &Quote, point: f64) -> Signal {
        if candles.len() < 3 || !quote.is_usable() || point <= 0.0 {
            return Signal::Hold;
        }

        let closed = closed_bars(candles);
        if self.config.dead_market_filter && self.is_dead_market(instrument, closed, point) {
            return Signal::Hold;
        }

        let prev = &closed[closed.len() - 1];
        let offset = self.config.pips * point;
        let sell_level = prev.low + offset;
        let buy_level = prev.high - offset;

        if quote.bid >= sell_level {
            tracing::info!(
                instrument = %instrument,
                "SELL signal, bid {:.5} >= {:.5} (+{:.1} pips)",
                quote.bid,
                sell_level,
                self.config.pips
            );
            return Signal::Sell;
        }
        if quote.ask <= buy_level {
            tracing::info!(
                instrument = %instrument,
                "BUY signal, ask {:.5} <= {:.5} (+{:.1} pips)",
                quote.ask,
                buy_level,
                self.config.pips
            );
            return Signal::Buy;
        }

        Signal::Hold
    }

    fn name(&self) -> &str {
        "range_breakout"
    }

    fn min_candles_required(&self) -> usize {
        if self.config.dead_market_filter {
            (self.config.dead_market_bars + 1).max(3)
        } else {
            3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::bars;

    const POINT: f64 = 0.00001;

    fn unfiltered() -> RangeBreakoutStrategy {
        RangeBreakoutStrategy::new(RangeBreakoutConfig {
            dead_market_filter: false,
            ..Default::default()
        })
    }

    /// Two filler bars, the previous bar, then a forming bar
    fn window(prev_high: f64, prev_low: f64) -> Vec<Candle> {
        bars(&[
            (1.1010, 1.0990, 1.1000),
            (1.1010, 1.0990, 1.1000),
            (prev_high, prev_low, 1.1002),
            (1.1003, 1.1001, 1.1002),
        ])
    }

    #[test]
    fn test_sell_above_previous_low() {
        let candles = window(1.10500, 1.10000);
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.10015, 1.10600), POINT);
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_buy_below_previous_high() {
        let candles = window(1.10500, 1.10000);
        // bid under the sell level so only the buy side can trigger
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.09990, 1.10497), POINT);
        assert_eq!(signal, Signal::Buy);
    }

    #[test]
    fn test_sell_checked_before_buy() {
        let candles = window(1.10500, 1.10000);
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.10010, 1.10400), POINT);
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_hold_inside_narrow_bar() {
        // sell level 1.100014 sits above buy level 1.100006
        let candles = window(1.10002, 1.10000);
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.10001, 1.10001), POINT);
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_forming_bar_is_ignored() {
        let mut candles = window(1.10500, 1.10000);
        // a forming bar with a very low low must not move the sell level
        let forming = candles.len() - 1;
        candles[forming].low = 1.0;
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.10005, 1.10600), POINT);
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_insufficient_history_holds() {
        let candles = bars(&[(1.105, 1.100, 1.102), (1.103, 1.101, 1.102)]);
        let signal = unfiltered().evaluate("EURUSD", &candles, &Quote::new(1.2, 1.2), POINT);
        assert_eq!(signal, Signal::Hold);
    }

    #[test]
    fn test_dead_market_filter_blocks_breakout() {
        // 20 closed bars spanning exactly 40 points, plus a forming bar
        let mut hlc = vec![(1.10040, 1.10000, 1.10020); 20];
        hlc.push((1.10030, 1.10010, 1.10020));
        let candles = bars(&hlc);

        let strategy = RangeBreakoutStrategy::default();
        // would be a SELL without the filter
        let quote = Quote::new(1.10030, 1.10100);
        assert_eq!(strategy.evaluate("EURUSD", &candles, &quote, POINT), Signal::Hold);
        assert_eq!(unfiltered().evaluate("EURUSD", &candles, &quote, POINT), Signal::Sell);
    }

    #[test]
    fn test_dead_market_filter_passes_wide_range() {
        let mut hlc = vec![(1.10040, 1.10000, 1.10020); 19];
        hlc.push((1.10100, 1.10000, 1.10050));
        hlc.push((1.10060, 1.10040, 1.10050));
        let candles = bars(&hlc);

        let strategy = RangeBreakoutStrategy::default();
        let signal = strategy.evaluate("EURUSD", &candles, &Quote::new(1.10030, 1.10100), POINT);
        assert_eq!(signal, Signal::Sell);
    }

    #[test]
    fn test_dead_market_filter_needs_enough_bars() {
        let candles = window(1.10500, 1.10000);
        let signal = RangeBreakoutStrategy::default().evaluate(
            "EURUSD",
            &candles,
            &Quote::new(1.10015, 1.10600),
            POINT,
        );
        assert_eq!(signal, Signal::Hold);
    }
}
