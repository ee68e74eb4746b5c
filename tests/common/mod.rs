use chrono::{DateTime, Duration, Utc};
use signal_trader::config::{Config, RiskConfig};
use signal_trader::models::{Candle, CandleSeries};

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
#[allow(dead_code)]
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// A Config for tests — no env vars, isolated temp dirs per test name so
/// state files never collide across parallel tests.
pub fn test_config(name: &str) -> Config {
    let tmp = std::env::temp_dir().join(format!("signal_trader_it_{}_{}", std::process::id(), name));
    Config {
        default_pair: "USDT".to_string(),
        default_leverage: 10,
        max_leverage: 125,
        risk: RiskConfig {
            account_balance: 10_000.0,
            risk_percentage: 0.02,
            entry_steps: 3,
            min_position_size: 10.0,
            default_position_fraction: 0.1,
        },
        fee_rate: 0.0,
        break_even_after_first_target: true,
        poll_interval_secs: 1,
        data_dir: tmp.join("data").to_string_lossy().to_string(),
        log_dir: tmp.join("logs").to_string_lossy().to_string(),
        log_level: "ERROR".to_string(),
    }
}
