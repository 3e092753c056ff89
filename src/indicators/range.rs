use crate::models::Candle;

/// Highest high across the bars, None when empty
pub fn highest_high(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| c.high).reduce(f64::max)
}

/// Lowest low across the bars, None when empty
pub fn lowest_low(candles: &[Candle]) -> Option<f64> {
    candles.iter().map(|c| c.low).reduce(f64::min)
}

/// High-low span of the bars measured in price points
pub fn range_in_points(candles: &[Candle], point: f64) -> Option<f64> {
    if point <= 0.0 {
        return None;
    }
    let high = highest_high(candles)?;
    let low = lowest_low(candles)?;
    Some((high - low) / point)
}
