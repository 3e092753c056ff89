use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Candle, Quote, Timeframe};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("unknown instrument {0}")]
    UnknownInstrument(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Market snapshot provider
///
/// Retry-with-backoff is the provider's own business; callers only rely on
/// it eventually answering `Unavailable` instead of blocking forever.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Current bid/ask
    async fn quote(&self, instrument: &str) -> Result<Quote, FeedError>;

    /// Most recent `count` bars, oldest first; the last bar may still be forming
    async fn candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, FeedError>;

    /// Smallest quoted price increment of the instrument
    async fn point(&self, instrument: &str) -> Result<f64, FeedError>;
}
