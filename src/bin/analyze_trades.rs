use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use fxbot::config::Settings;
use fxbot::persistence::{Stats, TradeJournal};
use fxbot::{Result, TradeRecord};

#[derive(Parser, Debug)]
#[command(about = "Summarize the trade journal and stats snapshot")]
struct Args {
    /// Settings file used to locate the journal and stats snapshot
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal CSV, overrides the configured path
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Only trades on this instrument
    #[arg(long)]
    instrument: Option<String>,
}

#[derive(Default)]
struct Breakdown {
    trades: usize,
    wins: usize,
    profit: f64,
    best: f64,
    worst: f64,
}

impl Breakdown {
    fn add(&mut self, trade: &TradeRecord) {
        if self.trades == 0 {
            self.best = trade.realized_profit;
            self.worst = trade.realized_profit;
        }
        self.trades += 1;
        if trade.is_win() {
            self.wins += 1;
        }
        self.profit += trade.realized_profit;
        self.best = self.best.max(trade.realized_profit);
        self.worst = self.worst.min(trade.realized_profit);
    }

    fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }
}

fn print_table(title: &str, rows: &BTreeMap<String, Breakdown>) {
    println!("\n{}", title);
    println!(
        "{:<14} {:>7} {:>8} {:>12} {:>10} {:>10}",
        "", "Trades", "Win %", "Profit", "Best", "Worst"
    );
    println!("{}", "─".repeat(66));
    for (key, row) in rows {
        println!(
            "{:<14} {:>7} {:>7.1}% {:>12.2} {:>10.2} {:>10.2}",
            key,
            row.trades,
            row.win_rate(),
            row.profit,
            row.best,
            row.worst
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("fxbot=warn").init();
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?;
    let journal_path = args
        .journal
        .unwrap_or_else(|| settings.persistence.journal_path.clone());

    println!("\n═══════════════════════════════════════════════════════");
    println!("               TRADE JOURNAL ANALYSIS");
    println!("═══════════════════════════════════════════════════════");
    println!("Journal: {}", journal_path.display());

    let mut trades = TradeJournal::read_all(&journal_path)?;
    if let Some(instrument) = &args.instrument {
        trades.retain(|t| &t.instrument == instrument);
    }
    if trades.is_empty() {
        println!("\nNo closed trades recorded.");
        return Ok(());
    }

    let mut total = Breakdown::default();
    let mut by_instrument: BTreeMap<String, Breakdown> = BTreeMap::new();
    let mut by_reason: BTreeMap<String, Breakdown> = BTreeMap::new();
    let mut by_direction: BTreeMap<String, Breakdown> = BTreeMap::new();

    for trade in &trades {
        total.add(trade);
        by_instrument.entry(trade.instrument.clone()).or_default().add(trade);
        by_reason.entry(trade.close_reason.to_string()).or_default().add(trade);
        by_direction.entry(trade.direction.to_string()).or_default().add(trade);
    }

    let held: Vec<i64> = trades
        .iter()
        .map(|t| (t.closed_at - t.opened_at).num_minutes())
        .collect();
    let avg_hold = held.iter().sum::<i64>() as f64 / held.len() as f64;

    println!("\nTrades:       {}", total.trades);
    println!("Win rate:     {:.1}%", total.win_rate());
    println!("Net profit:   {:.2}", total.profit);
    println!("Best / worst: {:.2} / {:.2}", total.best, total.worst);
    println!("Avg hold:     {:.0} min", avg_hold);

    print_table("By instrument", &by_instrument);
    print_table("By close reason", &by_reason);
    print_table("By direction", &by_direction);

    // Cross-check against the running totals the engine keeps
    if args.instrument.is_none() {
        let stats_path = &settings.persistence.stats_path;
        println!("\nStats snapshot: {}", stats_path.display());
        match Stats::read(stats_path) {
            Ok(stats) => {
                println!(
                    "  {} trades, {:.2} profit, {:.2}% win rate",
                    stats.trade_count(),
                    stats.total_profit,
                    stats.win_rate
                );
                if stats.trade_count() != total.trades {
                    println!(
                        "  ⚠️  Snapshot has {} trades, journal has {}",
                        stats.trade_count(),
                        total.trades
                    );
                }
            }
            Err(e) => println!("  ⚠️  Cannot read snapshot: {}", e),
        }
    }

    Ok(())
}
