use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::config::{Config, RiskConfig};
use crate::models::{Candle, CandleSeries, Direction, EntryZone, ParsedSignal};

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
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

/// A fully populated long signal: BTC 45000-46000, 5x, three targets, stop at 44000.
pub fn parsed_long_signal() -> ParsedSignal {
    ParsedSignal {
        id: 1,
        coin: Some("BTC".to_string()),
        pair: "USDT".to_string(),
        direction: Some(Direction::Long),
        entry_zone: Some(EntryZone {
            low: 45_000.0,
            high: 46_000.0,
        }),
        leverage: 5,
        margin_mode: None,
        targets: vec![47_000.0, 48_000.0, 49_000.0],
        stop_loss: Some(44_000.0),
        raw_text: "#BTC/USDT LONG Entry: 45000-46000 Leverage: 5x Targets: 47000, 48000, 49000 Stop Loss: 44000".to_string(),
        parse_errors: Vec::new(),
        confidence: BTreeMap::new(),
    }
}

/// The mirror short: ETH 3200-3250, 3x, descending targets, stop at 3300.
pub fn parsed_short_signal() -> ParsedSignal {
    ParsedSignal {
        id: 2,
        coin: Some("ETH".to_string()),
        pair: "USDT".to_string(),
        direction: Some(Direction::Short),
        entry_zone: Some(EntryZone {
            low: 3_200.0,
            high: 3_250.0,
        }),
        leverage: 3,
        margin_mode: None,
        targets: vec![3_100.0, 3_000.0, 2_900.0],
        stop_loss: Some(3_300.0),
        raw_text: "$ETH SHORT Entry Zone: 3200-3250 TP: 3100, 3000, 2900 SL: 3300".to_string(),
        parse_errors: Vec::new(),
        confidence: BTreeMap::new(),
    }
}

/// A Config suitable for testing — no env vars needed, temp data dir.
pub fn default_test_config() -> Config {
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
        data_dir: std::env::temp_dir()
            .join("signal_trader_test_data")
            .to_string_lossy()
            .to_string(),
        log_dir: std::env::temp_dir()
            .join("signal_trader_test")
            .to_string_lossy()
            .to_string(),
        log_level: "ERROR".to_string(),
    }
}
