//! Error taxonomy for the trading engine
//!
//! Every failure is classified into one of four kinds. Transient, rejection
//! and persistence failures are recovered inside the component that saw them;
//! only fatal errors leave `Engine::start`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::execution::gateway::GatewayError;
use crate::execution::price_feed::FeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Feed/gateway timeout, missing quote, unresolvable symbol
    Transient,
    /// Gateway returned a non-success code
    Rejection,
    /// Stats or journal write failed
    Persistence,
    /// Configuration or startup failure; the engine refuses to run
    Fatal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("market data unavailable for {instrument}: {reason}")]
    MarketUnavailable { instrument: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("order rejected (code {code}): {message}")]
    OrderRejected { code: i64, message: String },

    #[error("gateway unavailable: {0}")]
    Gateway(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("startup failed: {0}")]
    Startup(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MarketUnavailable { .. }
            | EngineError::Timeout { .. }
            | EngineError::Gateway(_) => ErrorKind::Transient,
            EngineError::OrderRejected { .. } => ErrorKind::Rejection,
            EngineError::Persistence(_) => ErrorKind::Persistence,
            EngineError::Config(_) | EngineError::Startup(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Timeout means the call may or may not have reached the broker
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected { code, message } => EngineError::OrderRejected { code, message },
            GatewayError::Unavailable(reason) => EngineError::Gateway(reason),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Stats snapshot / trade journal write or read failure
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Run an external call under a deadline
///
/// A call that does not answer in time becomes a transient
/// [`EngineError::Timeout`] instead of hanging the loop.
pub async fn bounded<T, E, F>(operation: &str, limit: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<EngineError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(EngineError::Timeout {
            operation: operation.to_string(),
            timeout: limit,
        }),
    }
}

/// Attach an instrument to a feed failure
pub fn feed_error(instrument: &str, err: FeedError) -> EngineError {
    EngineError::MarketUnavailable {
        instrument: instrument.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let rejected: EngineError = GatewayError::Rejected {
            code: 10030,
            message: "unsupported filling mode".into(),
        }
        .into();
        assert_eq!(rejected.kind(), ErrorKind::Rejection);

        let down: EngineError = GatewayError::Unavailable("bridge closed".into()).into();
        assert_eq!(down.kind(), ErrorKind::Transient);

        assert!(EngineError::Startup("no instruments".into()).is_fatal());
        assert_eq!(
            EngineError::Persistence(PersistenceError::Io(std::io::Error::other("disk full"))).kind(),
            ErrorKind::Persistence
        );
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), EngineError> = bounded(
            "slow call",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), GatewayError>(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("slow call"));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded("fast call", Duration::from_secs(1), async {
            Ok::<_, GatewayError>(42)
        })
        .await;
        let value = tokio_test::assert_ok!(value);
        assert_eq!(value, 42);
    }
}
