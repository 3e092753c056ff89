use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fxbot::bridge::Mt5Bridge;
use fxbot::config::Settings;
use fxbot::error::bounded;
use fxbot::control::{run_control_loop, CommandSource};
use fxbot::execution::{MarketFeed, OrderGateway, PaperGateway};
use fxbot::notify::{LogSink, NotificationSink, TelegramClient};
use fxbot::{Engine, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fxbot", about = "Breakout trading loop for an MT5 terminal")]
struct Args {
    /// Settings file (TOML, YAML or JSON); defaults to ./settings.* if present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the detector: range_breakout or trend_breakout. Stops left at
    /// the configured detector's defaults follow the new one (trend_breakout
    /// uses ATR x1.2 stop and ATR x2.5 target)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Simulate fills instead of sending orders to the terminal
    #[arg(long)]
    paper: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    setup_logging(&settings.log_filter);

    if let Some(name) = &args.strategy {
        settings.select_strategy(name)?;
    }
    if args.paper {
        settings.execution.paper = true;
    }

    let call_timeout = settings.execution.call_timeout();
    let bridge = Arc::new(Mt5Bridge::new(&settings.bridge));
    if let Err(e) = bounded("connect", call_timeout, bridge.connect()).await {
        tracing::warn!("Terminal bridge not reachable yet ({}), will retry per call", e);
    }
    let feed: Arc<dyn MarketFeed> = bridge.clone();

    let gateway: Arc<dyn OrderGateway> = if settings.execution.paper {
        let paper = PaperGateway::seeded(feed.clone(), bridge.as_ref(), &settings.execution).await?;
        tracing::info!("📝 Paper trading with ${:.2}", paper.account_equity().await?);
        Arc::new(paper)
    } else {
        bridge.clone()
    };

    let telegram = if settings.telegram.is_configured() {
        Some(Arc::new(TelegramClient::new(&settings.telegram)?))
    } else {
        tracing::info!("Telegram not configured, events go to the log only");
        None
    };
    let sink: Arc<dyn NotificationSink> = match &telegram {
        Some(client) => client.clone(),
        None => Arc::new(LogSink),
    };

    let poll_interval = Duration::from_secs(settings.telegram.poll_interval_secs);
    let commands_enabled = settings.telegram.commands_enabled;

    let (mut engine, handle) = Engine::start(settings, feed, gateway, sink.clone()).await?;

    if args.once {
        engine.run_cycle_at(chrono::Utc::now()).await;
        engine.shutdown().await;
        return Ok(());
    }

    if let Some(client) = telegram {
        let source: Arc<dyn CommandSource> = client;
        let control_handle = handle.clone();
        let control_sink = sink.clone();
        tokio::spawn(async move {
            run_control_loop(source, control_sink, control_handle, poll_interval, commands_enabled)
                .await;
        });
    }

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the current cycle");
            signal_handle.stop();
        }
    });

    engine.run().await;
    Ok(())
}

/// `RUST_LOG` wins over the configured filter
fn setup_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
