use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use tracing_subscriber::{fmt, EnvFilter};

use signal_trader::backtesting::{data_fetcher, BacktestRunner};
use signal_trader::config::Config;
use signal_trader::models::BacktestStatus;
use signal_trader::parser::SignalParser;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(signals_path) = args.get(1) else {
        bail!("usage: backtest <signals-file> [days-back] [interval]");
    };
    let days_back: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(30);
    let interval = args.get(3).map(String::as_str).unwrap_or("1h");

    let blob = std::fs::read_to_string(signals_path)?;
    let chunks: Vec<&str> = blob.split("\n\n").filter(|c| !c.trim().is_empty()).collect();
    if chunks.is_empty() {
        bail!("no signals found in {signals_path}");
    }

    // All signals in one run are replayed against one symbol's candles,
    // taken from the first actionable signal.
    let parser = SignalParser::new(&cfg);
    let Some(symbol) = chunks
        .iter()
        .map(|c| parser.parse(c))
        .find_map(|s| s.symbol())
    else {
        bail!("none of the signals are actionable");
    };

    let end = Utc::now();
    let start = end - Duration::days(days_back);

    println!("{}", "=".repeat(70));
    println!("SIGNAL BACKTESTER");
    println!("Symbol:   {symbol}");
    println!("Signals:  {}", chunks.len());
    println!("Period:   {days_back} days of {interval} candles");
    println!(
        "Balance:  ${:.2} at {:.1}% risk",
        cfg.risk.account_balance,
        cfg.risk.risk_percentage * 100.0
    );
    println!("{}", "=".repeat(70));

    let candles =
        data_fetcher::fetch_and_cache(&symbol, interval, start, end, &cfg.data_dir).await?;
    if candles.is_empty() {
        bail!("no candle data available for {symbol}");
    }
    println!("Loaded {} candles\n", candles.len());

    let mut runner = BacktestRunner::new(&cfg);
    let result = runner.run(&chunks, &candles);

    match result.status {
        BacktestStatus::Completed => {
            if let Some(report) = &result.report {
                report.print_summary();
            }
            let out = format!("{}/backtest_{}.json", cfg.data_dir, result.id);
            std::fs::write(&out, serde_json::to_string_pretty(&result)?)?;
            println!("\nFull results written to {out}");
            Ok(())
        }
        _ => bail!(
            "backtest failed: {}",
            result.error.unwrap_or_else(|| "unknown error".into())
        ),
    }
}
