use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use tracing::{debug, info};

use crate::models::{Candle, CandleSeries};

const BINANCE_API: &str = "https://api.binance.com/api/v3";
const MAX_CANDLES_PER_REQUEST: i64 = 1000;
const RATE_LIMIT_SLEEP_MS: u64 = 250;

/// Fetch historical klines from Binance and cache them as local JSON so
/// repeated runs over the same window never refetch.
pub async fn fetch_and_cache(
    symbol: &str,
    interval: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    data_dir: &str,
) -> Result<CandleSeries> {
    std::fs::create_dir_all(data_dir)?;

    let cache_file = format!(
        "{}/{}_{}_{}_to_{}.json",
        data_dir,
        symbol,
        interval,
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    );

    if Path::new(&cache_file).exists() {
        info!("Loading cached {symbol} {interval} data from {cache_file}");
        let content = std::fs::read_to_string(&cache_file)?;
        let candles: Vec<Candle> = serde_json::from_str(&content)?;
        info!("  Loaded {} candles", candles.len());
        return Ok(CandleSeries::new(candles));
    }

    info!(
        "Fetching {symbol} {interval} data from Binance ({} to {})...",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    let candles = fetch_range(symbol, interval, start, end).await?;
    info!("  Fetched {} candles total", candles.len());

    let json = serde_json::to_string(&candles)?;
    std::fs::write(&cache_file, json)?;
    info!("  Cached to {cache_file}");

    Ok(CandleSeries::new(candles))
}

async fn fetch_range(
    symbol: &str,
    interval: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Candle>> {
    let client = reqwest::Client::new();
    let interval_ms = interval_millis(interval)?;
    let mut cursor = start.timestamp_millis();
    let end_ms = end.timestamp_millis();
    let mut candles: Vec<Candle> = Vec::new();

    while cursor < end_ms {
        let batch_end = (cursor + interval_ms * MAX_CANDLES_PER_REQUEST).min(end_ms);
        let url = format!(
            "{BINANCE_API}/klines?symbol={symbol}&interval={interval}&startTime={cursor}&endTime={batch_end}&limit={MAX_CANDLES_PER_REQUEST}"
        );
        debug!("GET {url}");
        let rows: Vec<serde_json::Value> = client
            .get(&url)
            .send()
            .await
            .context("requesting klines")?
            .error_for_status()
            .context("klines request rejected")?
            .json()
            .await
            .context("decoding klines")?;

        if rows.is_empty() {
            break;
        }
        for row in &rows {
            candles.push(parse_kline(row)?);
        }
        cursor = batch_end;
        tokio::time::sleep(tokio::time::Duration::from_millis(RATE_LIMIT_SLEEP_MS)).await;
    }

    let mut series = CandleSeries::new(candles);
    series.normalize();
    Ok(series.into_iter().collect())
}

/// Spot price for a symbol, used when flattening live trades by hand.
pub async fn fetch_latest_price(symbol: &str) -> Result<f64> {
    let url = format!("{BINANCE_API}/ticker/price?symbol={symbol}");
    let body: serde_json::Value = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .context("requesting ticker")?
        .error_for_status()?
        .json()
        .await?;
    body["price"]
        .as_str()
        .and_then(|p| p.parse::<f64>().ok())
        .ok_or_else(|| anyhow!("malformed ticker response for {symbol}"))
}

fn interval_millis(interval: &str) -> Result<i64> {
    let ms = match interval {
        "1m" => 60_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "1h" => 3_600_000,
        "4h" => 14_400_000,
        "1d" => 86_400_000,
        other => return Err(anyhow!("unsupported interval {other}")),
    };
    Ok(ms)
}

/// Binance kline rows are arrays: open time, then OHLCV as strings.
fn parse_kline(row: &serde_json::Value) -> Result<Candle> {
    let arr = row
        .as_array()
        .ok_or_else(|| anyhow!("kline row is not an array"))?;
    if arr.len() < 6 {
        return Err(anyhow!("kline row too short"));
    }
    let ts_ms = arr[0]
        .as_i64()
        .ok_or_else(|| anyhow!("kline open time is not an integer"))?;
    let field = |i: usize| -> Result<f64> {
        arr[i]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("kline field {i} is not a numeric string"))
    };
    Ok(Candle {
        timestamp: Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .ok_or_else(|| anyhow!("kline open time out of range"))?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_binance_kline_row() {
        let row = json!([
            1705320000000i64,
            "45000.1",
            "45100.5",
            "44950.0",
            "45050.2",
            "123.45",
            1705320059999i64,
            "5560000.0",
            100,
            "60.0",
            "2700000.0",
            "0"
        ]);
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.timestamp.timestamp_millis(), 1705320000000);
        assert!((candle.open - 45000.1).abs() < 1e-9);
        assert!((candle.high - 45100.5).abs() < 1e-9);
        assert!((candle.low - 44950.0).abs() < 1e-9);
        assert!((candle.close - 45050.2).abs() < 1e-9);
        assert!((candle.volume - 123.45).abs() < 1e-9);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(parse_kline(&json!({"not": "an array"})).is_err());
        assert!(parse_kline(&json!([1705320000000i64, "45000.1"])).is_err());
        assert!(parse_kline(&json!(["nan", "a", "b", "c", "d", "e"])).is_err());
    }

    #[test]
    fn interval_lookup_covers_supported_granularities() {
        assert_eq!(interval_millis("1m").unwrap(), 60_000);
        assert_eq!(interval_millis("1h").unwrap(), 3_600_000);
        assert!(interval_millis("3w").is_err());
    }
}
