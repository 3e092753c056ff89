/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA) series
///
/// Smoothing factor is `2 / (period + 1)`. The series is seeded with the
/// first value (no SMA warm-up), so element `i` only depends on values `0..=i`.
pub fn calculate_ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(values.len());

    let mut ema = values[0];
    series.push(ema);
    for value in &values[1..] {
        ema = (value - ema) * multiplier + ema;
        series.push(ema);
    }

    series
}

/// Latest EMA value, or None with fewer than `period` values
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    calculate_ema_series(values, period).last().copied()
}
