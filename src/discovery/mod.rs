// Instrument admission
pub mod allowlist;

pub use allowlist::InstrumentGate;
