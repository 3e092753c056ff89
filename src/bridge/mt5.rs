//! MT5 bridge client: JSON lines over TCP, one response per request
//!
//! A bridge script inside the terminal answers each request line with one
//! response line: `{"ok":true,"data":...}` or
//! `{"ok":false,"code":N,"error":"..."}`. The connection is opened lazily and
//! kept only after an exchange completes with a well-formed reply. A timed-out
//! call, an I/O error or an undecodable reply drops it, so a late answer can
//! never be read by the next request.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::BridgeConfig;
use crate::execution::gateway::{BrokerPosition, GatewayError, OrderGateway, OrderRequest};
use crate::execution::price_feed::{FeedError, MarketFeed};
use crate::models::{Candle, Direction, Quote, Ticket, Timeframe};

/// Terminal error code for a symbol it does not know
const ERR_UNKNOWN_SYMBOL: i64 = 4301;

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
enum BridgeError {
    /// Connection or protocol failure
    Io(String),
    /// The terminal answered with an error code
    Remote { code: i64, message: String },
}

impl From<BridgeError> for FeedError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io(reason) => FeedError::Unavailable(reason),
            BridgeError::Remote { code, message } if code == ERR_UNKNOWN_SYMBOL => {
                FeedError::UnknownInstrument(message)
            }
            BridgeError::Remote { code, message } => {
                FeedError::Unavailable(format!("code {}: {}", code, message))
            }
        }
    }
}

impl From<BridgeError> for GatewayError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io(reason) => GatewayError::Unavailable(reason),
            BridgeError::Remote { code, message } => GatewayError::Rejected { code, message },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    bid: f64,
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct WireBar {
    /// Bar open, unix seconds
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct WireSymbol {
    point: f64,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    equity: f64,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    ticket: Ticket,
}

#[derive(Debug, Deserialize)]
struct WireClose {
    profit: f64,
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    ticket: Ticket,
    symbol: String,
    side: Direction,
    volume: f64,
    price_open: f64,
    #[serde(default)]
    sl: f64,
    #[serde(default)]
    tp: f64,
    #[serde(default)]
    profit: f64,
    /// Open time, unix seconds
    #[serde(default)]
    time: Option<i64>,
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Client for the in-terminal bridge script
pub struct Mt5Bridge {
    addr: String,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl Mt5Bridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open the connection now instead of on first use
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await.map_err(GatewayError::from)?);
        }
        Ok(())
    }

    async fn open(&self) -> Result<BufReader<TcpStream>, BridgeError> {
        tracing::info!("Connecting to MT5 bridge at {}...", self.addr);
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| BridgeError::Io(format!("connect {}: {}", self.addr, e)))?;
        tracing::info!("Connected to MT5 bridge");
        Ok(BufReader::new(stream))
    }

    async fn request<T: DeserializeOwned>(&self, request: Value) -> Result<T, BridgeError> {
        let mut guard = self.conn.lock().await;
        // Out of the slot for the whole exchange: if this future is dropped
        // mid-flight the stream goes with it and the next call reconnects.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.open().await?,
        };

        let mut line = request.to_string();
        line.push('\n');

        let exchange = async {
            conn.get_mut().write_all(line.as_bytes()).await?;
            let mut response = String::new();
            let read = conn.read_line(&mut response).await?;
            Ok::<_, std::io::Error>((read, response))
        };

        let response = match exchange.await {
            Ok((0, _)) => {
                tracing::warn!("MT5 bridge closed the connection");
                return Err(BridgeError::Io("bridge closed the connection".to_string()));
            }
            Ok((_, response)) => response,
            Err(e) => {
                tracing::warn!("MT5 bridge I/O error: {}", e);
                return Err(BridgeError::Io(e.to_string()));
            }
        };

        let envelope: Envelope = match serde_json::from_str(response.trim()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("MT5 bridge sent a malformed response, reconnecting: {}", e);
                return Err(BridgeError::Io(format!("malformed bridge response: {}", e)));
            }
        };
        if !envelope.ok {
            *guard = Some(conn);
            return Err(BridgeError::Remote {
                code: envelope.code,
                message: envelope.error,
            });
        }
        match serde_json::from_value(envelope.data) {
            Ok(data) => {
                *guard = Some(conn);
                Ok(data)
            }
            Err(e) => {
                tracing::warn!("MT5 bridge sent an unexpected payload, reconnecting: {}", e);
                Err(BridgeError::Io(format!("unexpected bridge payload: {}", e)))
            }
        }
    }
}

#[async_trait]
impl MarketFeed for Mt5Bridge {
    async fn quote(&self, instrument: &str) -> Result<Quote, FeedError> {
        let wire: WireQuote = self
            .request(json!({"cmd": "quote", "symbol": instrument}))
            .await?;
        Ok(Quote::new(wire.bid, wire.ask))
    }

    async fn candles(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>, FeedError> {
        let bars: Vec<WireBar> = self
            .request(json!({
                "cmd": "candles",
                "symbol": instrument,
                "timeframe": timeframe.to_string(),
                "count": count,
            }))
            .await?;

        let mut candles = Vec::with_capacity(bars.len());
        for bar in bars {
            let open_time = from_unix(bar.time)
                .ok_or_else(|| FeedError::Unavailable(format!("bad bar time {}", bar.time)))?;
            candles.push(Candle {
                open_time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.tick_volume,
            });
        }
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn point(&self, instrument: &str) -> Result<f64, FeedError> {
        let wire: WireSymbol = self
            .request(json!({"cmd": "symbol_info", "symbol": instrument}))
            .await?;
        Ok(wire.point)
    }
}

#[async_trait]
impl OrderGateway for Mt5Bridge {
    async fn account_equity(&self) -> Result<f64, GatewayError> {
        let wire: WireAccount = self.request(json!({"cmd": "account"})).await?;
        Ok(wire.equity)
    }

    async fn submit(&self, order: &OrderRequest) -> Result<Ticket, GatewayError> {
        let wire: WireOrder = self
            .request(json!({
                "cmd": "order_send",
                "symbol": order.instrument,
                "side": order.direction,
                "volume": order.volume,
                "price": order.price,
                "sl": order.stop_loss,
                "tp": order.take_profit,
                "filling": order.fill_mode,
            }))
            .await?;
        tracing::info!(
            instrument = %order.instrument,
            ticket = wire.ticket,
            "Order filled: {} {:.2} @ {:.5}",
            order.direction,
            order.volume,
            order.price
        );
        Ok(wire.ticket)
    }

    async fn close(&self, ticket: Ticket) -> Result<f64, GatewayError> {
        let wire: WireClose = self
            .request(json!({"cmd": "close", "ticket": ticket}))
            .await?;
        Ok(wire.profit)
    }

    async fn list_open_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let positions: Vec<WirePosition> = self.request(json!({"cmd": "positions"})).await?;
        Ok(positions
            .into_iter()
            .map(|p| BrokerPosition {
                ticket: p.ticket,
                instrument: p.symbol,
                direction: p.side,
                volume: p.volume,
                entry_price: p.price_open,
                stop_loss: p.sl,
                take_profit: p.tp,
                profit: p.profit,
                opened_at: p.time.and_then(from_unix),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::FillMode;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Serve one connection, answering each request line via `respond`
    async fn serve<F>(respond: F) -> BridgeConfig
    where
        F: Fn(Value) -> Value + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let mut reply = respond(request).to_string();
                reply.push('\n');
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_quote_and_candles() {
        let config = serve(|req| match req["cmd"].as_str() {
            Some("quote") => json!({"ok": true, "data": {"bid": 1.10012, "ask": 1.10025}}),
            Some("candles") => {
                assert_eq!(req["timeframe"], "M15");
                json!({"ok": true, "data": [
                    {"time": 1764064800, "open": 1.1, "high": 1.2, "low": 1.0, "close": 1.15, "tick_volume": 50.0},
                    {"time": 1764063900, "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.05}
                ]})
            }
            _ => json!({"ok": false, "code": 1, "error": "unexpected"}),
        })
        .await;

        let bridge = Mt5Bridge::new(&config);
        let quote = bridge.quote("EURUSD").await.unwrap();
        assert_eq!(quote, Quote::new(1.10012, 1.10025));

        let candles = bridge.candles("EURUSD", Timeframe::M15, 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        // sorted oldest first
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[0].volume, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_maps_to_feed_error() {
        let config = serve(|_| json!({"ok": false, "code": 4301, "error": "XAUEUR"})).await;
        let bridge = Mt5Bridge::new(&config);

        let err = bridge.point("XAUEUR").await.unwrap_err();
        assert_eq!(err, FeedError::UnknownInstrument("XAUEUR".to_string()));
    }

    #[tokio::test]
    async fn test_order_rejection_keeps_code() {
        let config = serve(|req| {
            if req["filling"] == "fok" {
                json!({"ok": false, "code": 10030, "error": "Unsupported filling mode"})
            } else {
                json!({"ok": true, "data": {"ticket": 123456}})
            }
        })
        .await;
        let bridge = Mt5Bridge::new(&config);

        let mut order = OrderRequest {
            instrument: "EURUSD".to_string(),
            direction: Direction::Buy,
            volume: 0.1,
            price: 1.1,
            stop_loss: 1.09,
            take_profit: 1.12,
            fill_mode: FillMode::Fok,
        };
        let err = bridge.submit(&order).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                code: 10030,
                message: "Unsupported filling mode".to_string()
            }
        );

        order.fill_mode = FillMode::Ioc;
        assert_eq!(bridge.submit(&order).await.unwrap(), 123456);
    }

    #[tokio::test]
    async fn test_positions_listing() {
        let config = serve(|_| {
            json!({"ok": true, "data": [
                {"ticket": 9, "symbol": "GBPUSD", "side": "SELL", "volume": 0.2,
                 "price_open": 1.27, "sl": 1.275, "tp": 1.26, "profit": -3.4, "time": 1764064800}
            ]})
        })
        .await;
        let bridge = Mt5Bridge::new(&config);

        let positions = bridge.list_open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].direction, Direction::Sell);
        assert_eq!(positions[0].profit, -3.4);
        assert!(positions[0].opened_at.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_unavailable() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let bridge = Mt5Bridge::new(&BridgeConfig {
            host: "127.0.0.1".to_string(),
            port,
        });
        let err = bridge.account_equity().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    /// Accept any number of connections; the first request overall is
    /// answered after `first_delay`. Returns the accepted connection count.
    async fn serve_reconnecting<F>(first_delay: Duration, respond: F) -> (BridgeConfig, Arc<AtomicUsize>)
    where
        F: Fn(usize, Value) -> Value + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let respond = Arc::new(respond);
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let requests = requests.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let n = requests.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            tokio::time::sleep(first_delay).await;
                        }
                        let request: Value = serde_json::from_str(&line).unwrap();
                        let mut reply = respond(n, request).to_string();
                        reply.push('\n');
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            port,
        };
        (config, accepted)
    }

    fn quote_by_symbol(_: usize, req: Value) -> Value {
        match req["symbol"].as_str() {
            Some("EURUSD") => json!({"ok": true, "data": {"bid": 1.1, "ask": 1.1002}}),
            _ => json!({"ok": true, "data": {"bid": 1.27, "ask": 1.2702}}),
        }
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_not_read_by_next_call() {
        let (config, accepted) =
            serve_reconnecting(Duration::from_millis(200), quote_by_symbol).await;
        let bridge = Mt5Bridge::new(&config);

        let first = tokio::time::timeout(Duration::from_millis(50), bridge.quote("EURUSD")).await;
        assert!(first.is_err());

        let quote = bridge.quote("GBPUSD").await.unwrap();
        assert_eq!(quote, Quote::new(1.27, 1.2702));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);

        // healthy exchanges reuse the connection
        let again = bridge.quote("EURUSD").await.unwrap();
        assert_eq!(again, Quote::new(1.1, 1.1002));
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_reply_drops_connection() {
        let (config, accepted) = serve_reconnecting(Duration::ZERO, |n, req| match n {
            0 => json!({"ok": true, "data": {"unexpected": true}}),
            1 => json!("not an envelope"),
            _ => quote_by_symbol(n, req),
        })
        .await;
        let bridge = Mt5Bridge::new(&config);

        assert!(matches!(bridge.quote("EURUSD").await, Err(FeedError::Unavailable(_))));
        assert!(matches!(bridge.quote("EURUSD").await, Err(FeedError::Unavailable(_))));
        let quote = bridge.quote("GBPUSD").await.unwrap();
        assert_eq!(quote, Quote::new(1.27, 1.2702));
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_remote_error_keeps_connection() {
        let (config, accepted) = serve_reconnecting(Duration::ZERO, |n, req| match n {
            0 => json!({"ok": false, "code": 4301, "error": "unknown symbol"}),
            _ => quote_by_symbol(n, req),
        })
        .await;
        let bridge = Mt5Bridge::new(&config);

        assert!(bridge.quote("XAUUSD").await.is_err());
        assert!(bridge.quote("GBPUSD").await.is_ok());
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
