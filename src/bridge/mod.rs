// Terminal connectivity
pub mod mt5;

pub use mt5::Mt5Bridge;
