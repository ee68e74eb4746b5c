use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use signal_trader::backtesting::data_fetcher;
use signal_trader::bot::SignalBot;
use signal_trader::config::Config;
use signal_trader::exchange::PaperExchange;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // Signals are read from a file of blank-line separated messages.
    let args: Vec<String> = std::env::args().collect();
    let signals = match args.get(1) {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            warn!("No signals file given; starting with an empty book");
            String::new()
        }
    };

    let poll_interval = cfg.poll_interval_secs;
    let exchange = PaperExchange::default();
    let feed = exchange.clone();
    let shared_config = cfg.shared();

    let mut bot = SignalBot::new(shared_config, Box::new(exchange)).await;

    let mut symbols: Vec<String> = Vec::new();
    for chunk in split_messages(&signals) {
        match bot.submit_signal(&chunk).await {
            Ok(trade_id) => {
                if let Some(trade) = bot.trade(trade_id) {
                    if !symbols.contains(&trade.symbol) {
                        symbols.push(trade.symbol.clone());
                    }
                }
            }
            Err(e) => warn!("Rejected signal: {e:#}"),
        }
    }

    // The paper book follows one live price stream; extra symbols would
    // cross-fill against it.
    if symbols.len() > 1 {
        warn!(
            "Multiple symbols submitted; price feed follows {} only",
            symbols[0]
        );
    }
    if let Some(symbol) = symbols.first().cloned() {
        let price = data_fetcher::fetch_latest_price(&symbol).await?;
        feed.set_price(price);
        info!("Seeded {symbol} at {price}");

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(poll_interval)).await;
                match data_fetcher::fetch_latest_price(&symbol).await {
                    Ok(price) => feed.set_price(price),
                    Err(e) => warn!("Price refresh failed: {e:#}"),
                }
            }
        });
    }

    bot.run().await?;
    Ok(())
}

fn split_messages(blob: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in blob.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}
