use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{Event, NotificationSink};
use crate::config::{StopDistance, TelegramConfig};
use crate::control::{CommandResponse, CommandSource, PositionView, StatusReport};

const SENDS_PER_SECOND: u32 = 1;
const SEND_BURST: u32 = 5;

// Type alias for the rate limiter to simplify signatures
type TelegramRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response envelope of every Bot API method
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Telegram Bot API client: HTML notifications out, chat commands in
///
/// Clones share the rate limiter and the update offset.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    rate_limiter: Arc<TelegramRateLimiter>,
    offset: Arc<AtomicI64>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_second(NonZeroU32::new(SENDS_PER_SECOND).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(SEND_BURST).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            offset: Arc::new(AtomicI64::new(0)),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Send one HTML message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.rate_limiter.until_ready().await;

        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage returned {}: {}", status, detail);
        }
        Ok(())
    }

    /// Fetch new updates and advance the offset past them
    async fn get_updates(&self) -> Result<Vec<Update>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", "0".to_string())])
            .send()
            .await
            .context("Telegram getUpdates request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Telegram getUpdates returned {}", status);
        }

        let envelope: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .context("Failed to parse getUpdates response")?;
        if !envelope.ok {
            anyhow::bail!(
                "Telegram getUpdates not ok: {}",
                envelope.description.unwrap_or_default()
            );
        }

        let updates = envelope.result.unwrap_or_default();
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.store(last + 1, Ordering::SeqCst);
        }
        Ok(updates)
    }
}

#[async_trait]
impl NotificationSink for TelegramClient {
    async fn notify(&self, event: &Event) -> Result<()> {
        self.send_message(&render_html(event)).await
    }
}

#[async_trait]
impl CommandSource for TelegramClient {
    /// Texts sent to the configured chat; other chats are ignored
    async fn poll(&self) -> Result<Vec<String>> {
        let updates = self.get_updates().await?;
        Ok(updates
            .into_iter()
            .filter_map(|u| u.message)
            .filter(|m| m.chat.id.to_string() == self.chat_id)
            .filter_map(|m| m.text)
            .collect())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn describe_distance(distance: &StopDistance) -> String {
    match distance {
        StopDistance::Pips(pips) => format!("{} pips", pips),
        StopDistance::AtrMultiple(multiple) => format!("{} x ATR", multiple),
    }
}

const COMMANDS_HELP: &str = "<b>Commands:</b>\n\
    /status → equity and statistics\n\
    /positions → open trades right now\n\
    /pause → stop opening new trades\n\
    /resume → allow new trades again\n\
    /stop → shut the bot down";

/// Render an event as Telegram HTML
pub fn render_html(event: &Event) -> String {
    match event {
        Event::Started {
            equity,
            strategy,
            instruments,
            risk,
            paper,
        } => format!(
            "<b>🤖 FXBOT STARTED{}</b>\n\n\
            💰 <b>Equity:</b> ${:.2}\n\
            🧭 <b>Strategy:</b> {}\n\
            🎯 <b>Take profit:</b> {}\n\
            🛑 <b>Stop loss:</b> {}\n\
            📊 <b>Risk:</b> {:.2}% of equity per trade\n\
            👀 <b>Instruments:</b> {}\n\n\
            <i>Commands: /status /positions /pause /resume /stop</i>",
            if *paper { " (PAPER)" } else { "" },
            equity,
            escape(strategy),
            describe_distance(&risk.take_profit),
            describe_distance(&risk.stop_loss),
            risk.risk_fraction * 100.0,
            escape(&instruments.join(", "))
        ),
        Event::Opened {
            instrument,
            direction,
            price,
            stop_loss,
            take_profit,
            ticket,
            volume,
        } => format!(
            "<b>🚀 TRADE OPENED</b>\n\n\
            📊 <b>Instrument:</b> {}\n\
            📈 <b>Direction:</b> {}\n\
            💰 <b>Volume:</b> {:.2}\n\
            💵 <b>Price:</b> {:.5}\n\
            🛑 <b>SL:</b> {:.5}\n\
            🎯 <b>TP:</b> {:.5}\n\
            🎫 <b>Ticket:</b> #{}",
            escape(instrument),
            direction,
            volume,
            price,
            stop_loss,
            take_profit,
            ticket
        ),
        Event::Closed {
            instrument,
            profit,
            reason,
            ticket,
        } => {
            let (emoji, color) = if *profit >= 0.0 { ("💰", "🟢") } else { ("📉", "🔴") };
            format!(
                "<b>{} TRADE CLOSED</b>\n\n\
                📊 <b>Instrument:</b> {}\n\
                <b>{}</b>\n\
                {} <b>Profit:</b> ${:.2}\n\
                🎫 <b>Ticket:</b> #{}",
                emoji,
                escape(instrument),
                reason,
                color,
                profit,
                ticket
            )
        }
        Event::Error { message } => {
            format!("<b>❌ BOT ERROR</b>\n<code>{}</code>", escape(message))
        }
        Event::Stopped => "<b>🛑 BOT STOPPED</b>\n<i>Shut down cleanly</i>".to_string(),
        Event::Response(response) => render_response(response),
    }
}

fn render_response(response: &CommandResponse) -> String {
    match response {
        CommandResponse::Status(report) => render_status(report),
        CommandResponse::Positions(positions) => render_positions(positions),
        CommandResponse::Stopping => "<b>🛑 Stopping after the current cycle</b>".to_string(),
        CommandResponse::Paused => "<b>⏸ Entries paused</b>\n<i>Open trades are still monitored</i>".to_string(),
        CommandResponse::Resumed => "<b>▶️ Entries resumed</b>".to_string(),
        CommandResponse::Help => COMMANDS_HELP.to_string(),
        CommandResponse::Disabled => "Commands are disabled".to_string(),
    }
}

fn render_status(report: &StatusReport) -> String {
    let equity = report
        .equity
        .map(|e| format!("${:.2}", e))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "<b>📊 BOT STATUS{}</b>\n\n\
        💰 <b>Equity:</b> {}\n\
        📈 <b>Win rate:</b> {:.1}%\n\
        💵 <b>Total profit:</b> ${:.2}\n\
        🔄 <b>Total trades:</b> {}\n\
        📂 <b>Open positions:</b> {}\n\n\
        {}",
        if report.paused { " (PAUSED)" } else { "" },
        equity,
        report.win_rate,
        report.total_profit,
        report.trade_count,
        report.open_positions,
        COMMANDS_HELP
    )
}

fn render_positions(positions: &[PositionView]) -> String {
    if positions.is_empty() {
        return "✅ No open positions right now.".to_string();
    }

    let mut lines = vec!["<b>📂 OPEN POSITIONS</b>\n".to_string()];
    let mut floating = 0.0;
    for p in positions {
        floating += p.floating_profit;
        let color = if p.floating_profit >= 0.0 { "🟢" } else { "🔴" };
        lines.push(format!(
            "{} <b>{}</b> {} {:.2} @ {:.5} → {:+.2} USD (#{})",
            color,
            escape(&p.instrument),
            p.direction,
            p.volume,
            p.entry_price,
            p.floating_profit,
            p.ticket
        ));
    }
    lines.push(format!("\n💰 <b>Floating profit:</b> {:+.2} USD", floating));
    lines.join("\n")
}
