use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

/// Risk inputs for the position sizer. Passed by value so backtests can vary
/// them per run without touching shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub account_balance: f64,
    /// Fraction of balance risked to the stop, e.g. 0.02 = 2%.
    pub risk_percentage: f64,
    /// Number of ladder rungs across the entry zone (1-5).
    pub entry_steps: usize,
    /// Minimum notional per rung; smaller rungs are dropped.
    pub min_position_size: f64,
    /// Fraction of balance used when the signal carries no stop loss.
    pub default_position_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Signal defaults
    pub default_pair: String,
    pub default_leverage: u32,
    pub max_leverage: u32,

    // Risk
    pub risk: RiskConfig,

    // Fees (as fraction, e.g. 0.0006 = 0.06% taker)
    pub fee_rate: f64,

    // Trade management
    /// Move the stop to average entry once the first target fills.
    pub break_even_after_first_target: bool,

    // Live loop
    pub poll_interval_secs: u64,

    // Paths & logging
    pub data_dir: String,
    pub log_dir: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        Config {
            default_pair: env("DEFAULT_PAIR", "USDT"),
            default_leverage: env("DEFAULT_LEVERAGE", "1").parse().unwrap_or(1),
            max_leverage: env("MAX_LEVERAGE", "125").parse().unwrap_or(125),
            risk: RiskConfig {
                account_balance: env("ACCOUNT_BALANCE", "1000").parse().unwrap_or(1000.0),
                risk_percentage: env("RISK_PERCENTAGE", "0.02").parse().unwrap_or(0.02),
                entry_steps: env("ENTRY_STEPS", "3").parse().unwrap_or(3),
                min_position_size: env("MIN_POSITION_SIZE", "10").parse().unwrap_or(10.0),
                default_position_fraction: env("DEFAULT_POSITION_FRACTION", "0.1")
                    .parse()
                    .unwrap_or(0.1),
            },
            fee_rate: env("FEE_RATE", "0.0006").parse().unwrap_or(0.0006),
            break_even_after_first_target: env("BREAK_EVEN_AFTER_TP1", "true")
                .to_lowercase()
                == "true",
            poll_interval_secs: env("POLL_INTERVAL_SECS", "5").parse().unwrap_or(5),
            data_dir: env("DATA_DIR", "data"),
            log_dir: env("LOG_DIR", "logs"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
