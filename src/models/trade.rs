use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Direction, ParsedSignal, TradeStatus};
use crate::sizing::EntryOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    AllTargets,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::AllTargets => write!(f, "all_targets"),
            CloseReason::Manual => write!(f, "manual"),
        }
    }
}

/// One rung of the laddered entry: a limit order at `price` for `size`
/// base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryStep {
    pub price: f64,
    pub size: f64,
    pub filled: bool,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Mutable state-machine instance created from exactly one ParsedSignal.
/// The signal is referenced by id, never owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub signal_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub leverage: u32,
    pub status: TradeStatus,
    pub entries: Vec<EntryStep>,
    /// Mutable: moved to break-even after the first target when configured.
    pub stop_loss: Option<f64>,
    pub targets: Vec<f64>,
    /// Indices into `targets`, sorted, no duplicates.
    pub targets_hit: Vec<usize>,
    /// Set once management begins; unfilled rungs are never resubmitted.
    #[serde(default)]
    pub entries_cancelled: bool,
    pub avg_entry_price: f64,
    /// Total filled size in base units.
    pub position_size: f64,
    pub remaining_size: f64,
    pub realized_pnl: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

impl Trade {
    pub fn from_signal(id: u64, signal: &ParsedSignal, ladder: &[EntryOrder]) -> Self {
        let entries = ladder
            .iter()
            .map(|o| EntryStep {
                price: o.price,
                // Size arrives as quote notional; orders go out in base units.
                size: o.size / o.price,
                filled: false,
                order_id: None,
            })
            .collect();

        Self {
            id,
            signal_id: signal.id,
            symbol: signal.symbol().unwrap_or_default(),
            direction: signal.direction.unwrap_or(Direction::Long),
            leverage: signal.leverage,
            status: TradeStatus::Pending,
            entries,
            stop_loss: signal.stop_loss,
            targets: signal.targets.clone(),
            targets_hit: Vec::new(),
            entries_cancelled: false,
            avg_entry_price: 0.0,
            position_size: 0.0,
            remaining_size: 0.0,
            realized_pnl: 0.0,
            opened_at: None,
            closed_at: None,
            close_reason: None,
            fail_reason: None,
        }
    }

    pub fn filled_steps(&self) -> impl Iterator<Item = &EntryStep> {
        self.entries.iter().filter(|e| e.filled)
    }

    /// Size-weighted average price over filled rungs.
    pub fn weighted_avg_entry(&self) -> f64 {
        let (notional, size) = self
            .filled_steps()
            .fold((0.0, 0.0), |(n, s), e| (n + e.price * e.size, s + e.size));
        if size > 0.0 {
            notional / size
        } else {
            0.0
        }
    }

    pub fn target_hit(&self, index: usize) -> bool {
        self.targets_hit.contains(&index)
    }

    pub fn all_targets_hit(&self) -> bool {
        !self.targets.is_empty() && self.targets_hit.len() == self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::parsed_long_signal;
    use crate::sizing::EntryOrder;

    // 0.1 base units at each rung once the notional is converted.
    fn ladder() -> Vec<EntryOrder> {
        vec![
            EntryOrder {
                price: 45000.0,
                size: 4500.0,
            },
            EntryOrder {
                price: 46000.0,
                size: 4600.0,
            },
        ]
    }

    #[test]
    fn new_trade_starts_pending_with_unfilled_ladder() {
        let signal = parsed_long_signal();
        let trade = Trade::from_signal(1, &signal, &ladder());
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.entries.len(), 2);
        assert!(trade.entries.iter().all(|e| !e.filled));
        assert_eq!(trade.symbol, "BTCUSDT");
        assert!(trade.opened_at.is_none());
    }

    #[test]
    fn weighted_avg_entry_uses_filled_rungs_only() {
        let signal = parsed_long_signal();
        let mut trade = Trade::from_signal(1, &signal, &ladder());
        assert!((trade.weighted_avg_entry() - 0.0).abs() < 1e-9);

        trade.entries[0].filled = true;
        assert!((trade.weighted_avg_entry() - 45000.0).abs() < 1e-9);

        trade.entries[1].filled = true;
        assert!((trade.weighted_avg_entry() - 45500.0).abs() < 1e-9);
    }
}
