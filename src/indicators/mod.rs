// Technical indicators module
// EMA and ATR for trend confirmation, rolling extremes for breakouts

pub mod atr;
pub mod moving_average;
pub mod range;

pub use atr::{calculate_atr, true_ranges};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma};
pub use range::{highest_high, lowest_low, range_in_points};
