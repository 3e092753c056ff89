use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use super::gateway::{BrokerPosition, GatewayError, OrderGateway, OrderRequest};
use super::price_feed::MarketFeed;
use crate::config::ExecutionConfig;
use crate::error::{bounded, EngineError};
use crate::models::Ticket;

/// Local order book that never reaches the broker
///
/// Orders fill at their requested price. Closes book
/// `(exit - entry) * sign * volume * contract_size` at the live monitored
/// side, and equity moves by the booked amount.
pub struct PaperGateway {
    feed: Arc<dyn MarketFeed>,
    contract_size: f64,
    equity: Mutex<f64>,
    positions: Mutex<BTreeMap<Ticket, BrokerPosition>>,
    next_ticket: AtomicU64,
}

impl PaperGateway {
    pub fn new(feed: Arc<dyn MarketFeed>, starting_equity: f64, contract_size: f64) -> Self {
        Self {
            feed,
            contract_size,
            equity: Mutex::new(starting_equity),
            positions: Mutex::new(BTreeMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Book seeded from `paper_starting_equity`, or from `account`'s equity
    /// when none is configured
    ///
    /// An account that cannot report equity within the call timeout is a
    /// startup failure; the paper balance is never guessed.
    pub async fn seeded(
        feed: Arc<dyn MarketFeed>,
        account: &dyn OrderGateway,
        config: &ExecutionConfig,
    ) -> Result<Self, EngineError> {
        let equity = match config.paper_starting_equity {
            Some(equity) => equity,
            None => bounded("account_equity", config.call_timeout(), account.account_equity())
                .await
                .map_err(|e| {
                    EngineError::Startup(format!(
                        "cannot seed paper equity from the terminal ({}); set execution.paper_starting_equity",
                        e
                    ))
                })?,
        };
        Ok(Self::new(feed, equity, config.paper_contract_size))
    }

    fn lock_err<T>(_: T) -> GatewayError {
        GatewayError::Unavailable("paper book lock poisoned".to_string())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn account_equity(&self) -> Result<f64, GatewayError> {
        self.equity.lock().map(|e| *e).map_err(Self::lock_err)
    }

    async fn submit(&self, order: &OrderRequest) -> Result<Ticket, GatewayError> {
        if order.volume <= 0.0 || order.price <= 0.0 {
            return Err(GatewayError::Rejected {
                code: 10014,
                message: format!("invalid volume {} / price {}", order.volume, order.price),
            });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let position = BrokerPosition {
            ticket,
            instrument: order.instrument.clone(),
            direction: order.direction,
            volume: order.volume,
            entry_price: order.price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            profit: 0.0,
            opened_at: Some(Utc::now()),
        };
        self.positions
            .lock()
            .map_err(Self::lock_err)?
            .insert(ticket, position);

        tracing::info!(
            instrument = %order.instrument,
            ticket = ticket,
            "[PAPER] {} {:.2} @ {:.5}",
            order.direction,
            order.volume,
            order.price
        );
        Ok(ticket)
    }

    async fn close(&self, ticket: Ticket) -> Result<f64, GatewayError> {
        let instrument = {
            let book = self.positions.lock().map_err(Self::lock_err)?;
            match book.get(&ticket) {
                Some(position) => position.instrument.clone(),
                None => {
                    return Err(GatewayError::Rejected {
                        code: 10036,
                        message: format!("position {} not found", ticket),
                    })
                }
            }
        };

        let quote = self
            .feed
            .quote(&instrument)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let position = self
            .positions
            .lock()
            .map_err(Self::lock_err)?
            .remove(&ticket)
            .ok_or_else(|| GatewayError::Unavailable(format!("position {} vanished", ticket)))?;

        let exit = position.direction.monitored_price(&quote);
        let profit = (exit - position.entry_price)
            * position.direction.sign()
            * position.volume
            * self.contract_size;

        *self.equity.lock().map_err(Self::lock_err)? += profit;

        tracing::info!(
            instrument = %instrument,
            ticket = ticket,
            "[PAPER] closed @ {:.5}, profit {:.2}",
            exit,
            profit
        );
        Ok(profit)
    }

    async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let book = self.positions.lock().map_err(Self::lock_err)?;
        Ok(book.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::price_feed::FeedError;
    use crate::execution::FillMode;
    use crate::models::{Candle, Direction, Quote, Timeframe};

    struct FixedFeed(Quote);

    #[async_trait]
    impl MarketFeed for FixedFeed {
        async fn quote(&self, _instrument: &str) -> Result<Quote, FeedError> {
            Ok(self.0)
        }

        async fn candles(
            &self,
            _instrument: &str,
            _timeframe: Timeframe,
            _count: usize,
        ) -> Result<Vec<Candle>, FeedError> {
            Ok(Vec::new())
        }

        async fn point(&self, _instrument: &str) -> Result<f64, FeedError> {
            Ok(0.00001)
        }
    }

    fn order(direction: Direction, price: f64) -> OrderRequest {
        OrderRequest {
            instrument: "EURUSD".to_string(),
            direction,
            volume: 0.5,
            price,
            stop_loss: 0.0,
            take_profit: 0.0,
            fill_mode: FillMode::Fok,
        }
    }

    #[tokio::test]
    async fn test_round_trip_books_profit() {
        let feed = Arc::new(FixedFeed(Quote::new(1.1010, 1.1012)));
        let paper = PaperGateway::new(feed, 10_000.0, 100_000.0);

        let ticket = paper.submit(&order(Direction::Buy, 1.1000)).await.unwrap();
        assert_eq!(paper.list_open_positions().await.unwrap().len(), 1);

        // long exits on the ask: (1.1012 - 1.1000) * 0.5 * 100000
        let profit = paper.close(ticket).await.unwrap();
        assert!((profit - 60.0).abs() < 1e-6);
        assert!((paper.account_equity().await.unwrap() - 10_060.0).abs() < 1e-6);
        assert!(paper.list_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_loses_when_price_rises() {
        let feed = Arc::new(FixedFeed(Quote::new(1.1010, 1.1012)));
        let paper = PaperGateway::new(feed, 10_000.0, 100_000.0);

        let ticket = paper.submit(&order(Direction::Sell, 1.1000)).await.unwrap();
        let profit = paper.close(ticket).await.unwrap();
        assert!((profit + 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unknown_ticket_rejected() {
        let feed = Arc::new(FixedFeed(Quote::new(1.1, 1.1)));
        let paper = PaperGateway::new(feed, 10_000.0, 100_000.0);
        let err = paper.close(99).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
    }

    /// Terminal that accepts the call and never answers
    struct SilentAccount;

    #[async_trait]
    impl OrderGateway for SilentAccount {
        async fn account_equity(&self) -> Result<f64, GatewayError> {
            std::future::pending().await
        }

        async fn submit(&self, _order: &OrderRequest) -> Result<Ticket, GatewayError> {
            std::future::pending().await
        }

        async fn close(&self, _ticket: Ticket) -> Result<f64, GatewayError> {
            std::future::pending().await
        }

        async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_seed_fails_when_terminal_never_answers() {
        let feed = Arc::new(FixedFeed(Quote::new(1.1010, 1.1012)));
        let config = ExecutionConfig {
            call_timeout_secs: 1,
            ..Default::default()
        };

        let result = PaperGateway::seeded(feed, &SilentAccount, &config).await;
        match result {
            Err(EngineError::Startup(message)) => assert!(message.contains("paper_starting_equity")),
            Err(other) => panic!("expected startup error, got {}", other),
            Ok(_) => panic!("paper book seeded without equity"),
        }
    }

    #[tokio::test]
    async fn test_seed_prefers_configured_balance() {
        let feed = Arc::new(FixedFeed(Quote::new(1.1010, 1.1012)));
        let config = ExecutionConfig {
            paper_starting_equity: Some(2_500.0),
            ..Default::default()
        };

        let paper = PaperGateway::seeded(feed, &SilentAccount, &config).await.unwrap();
        assert!((paper.account_equity().await.unwrap() - 2_500.0).abs() < 1e-9);
    }
}
