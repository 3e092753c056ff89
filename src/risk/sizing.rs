use crate::config::SizingConfig;

/// Risk-based lot sizing
///
/// `volume = equity * risk_fraction / (stop_loss_pips * pip_value)`, clamped
/// to the volume bounds and rounded to the lot step. The pip value is a coarse
/// per-instrument estimate supplied by the caller, so the result only
/// approximates the configured risk. Degenerate inputs fall back to the
/// minimum volume: sizing never blocks a trade.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizer {
    pub min_volume: f64,
    pub max_volume: f64,
    pub volume_step: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            min_volume: 0.01,
            max_volume: 2.0,
            volume_step: 0.01,
        }
    }
}

impl From<&SizingConfig> for PositionSizer {
    fn from(config: &SizingConfig) -> Self {
        Self {
            min_volume: config.min_volume,
            max_volume: config.max_volume,
            volume_step: config.volume_step,
        }
    }
}

impl PositionSizer {
    pub fn size(&self, equity: f64, risk_fraction: f64, stop_loss_pips: f64, pip_value: f64) -> f64 {
        if equity <= 0.0 || stop_loss_pips <= 0.0 || pip_value <= 0.0 {
            return self.min_volume;
        }

        let risk_amount = equity * risk_fraction;
        let raw = risk_amount / (stop_loss_pips * pip_value);
        if !raw.is_finite() {
            return self.min_volume;
        }

        let clamped = raw.clamp(self.min_volume, self.max_volume);
        self.round_to_step(clamped)
    }

    fn round_to_step(&self, volume: f64) -> f64 {
        if self.volume_step <= 0.0 {
            return volume;
        }
        let steps = (volume / self.volume_step).round();
        // strip float noise like 0.30000000000000004
        let rounded = (steps * self.volume_step * 1e8).round() / 1e8;
        rounded.clamp(self.min_volume, self.max_volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_from_risk_budget() {
        let sizer = PositionSizer::default();
        // 10000 * 0.01 / (20 * 10)
        assert_eq!(sizer.size(10_000.0, 0.01, 20.0, 10.0), 0.5);
    }

    #[test]
    fn test_huge_stop_clamps_to_minimum() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.size(10_000.0, 0.01, 1_000_000.0, 10.0), 0.01);
    }

    #[test]
    fn test_tiny_stop_clamps_to_maximum() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.size(10_000.0, 0.05, 1.0, 10.0), 2.0);
    }

    #[test]
    fn test_degenerate_inputs_use_minimum() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.size(10_000.0, 0.01, 0.0, 10.0), 0.01);
        assert_eq!(sizer.size(0.0, 0.01, 20.0, 10.0), 0.01);
        assert_eq!(sizer.size(-50.0, 0.01, 20.0, 10.0), 0.01);
    }

    #[test]
    fn test_rounds_to_lot_step() {
        let sizer = PositionSizer::default();
        // 10000 * 0.01 / (35 * 9) = 0.31746...
        assert_eq!(sizer.size(10_000.0, 0.01, 35.0, 9.0), 0.32);

        let coarse = PositionSizer {
            volume_step: 0.1,
            ..Default::default()
        };
        assert_eq!(coarse.size(10_000.0, 0.01, 35.0, 9.0), 0.3);
    }
}
