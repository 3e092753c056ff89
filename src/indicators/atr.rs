//! Average True Range (ATR) indicator
//!
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! ATR here is the plain rolling mean of the last `period` true ranges, with no
//! Wilder smoothing.

use crate::models::Candle;

/// True range of every bar that has a predecessor (`candles.len() - 1` values)
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let high = pair[1].high;
            let low = pair[1].low;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// Calculate ATR for the given candles
///
/// Returns the ATR of the last bar, or None if fewer than `period + 1` candles
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges = true_ranges(candles);
    let window = &ranges[ranges.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
