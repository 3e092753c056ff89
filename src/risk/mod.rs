// Risk management module
pub mod cooldown;
pub mod sizing;

pub use cooldown::CooldownTracker;
pub use sizing::PositionSizer;
