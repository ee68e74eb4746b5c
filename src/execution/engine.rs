use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::models::{CloseReason, Trade, TradeStatus};

/// Something that happened to a trade's orders, reported by the exchange
/// poller or synthesized by the backtest engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    EntryFilled { step: usize },
    TargetReached { index: usize },
    StopHit,
    ManualClose { price: f64 },
    OrderRejected { reason: String },
}

impl std::fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeEvent::EntryFilled { step } => write!(f, "entry_filled({step})"),
            TradeEvent::TargetReached { index } => write!(f, "target_reached({index})"),
            TradeEvent::StopHit => write!(f, "stop_hit"),
            TradeEvent::ManualClose { price } => write!(f, "manual_close({price})"),
            TradeEvent::OrderRejected { reason } => write!(f, "order_rejected({reason})"),
        }
    }
}

/// Side effect the caller must carry out against the exchange. The engine
/// itself never talks to the exchange, which is what lets the backtester
/// drive the identical transition code.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    CancelOrder(String),
    AmendStop { price: f64 },
}

/// Pure transition function over [`Trade`]. Applying an event that has
/// already been absorbed is a no-op, so a poller may re-deliver events
/// after a restart without corrupting state.
#[derive(Debug, Clone)]
pub struct TradeEngine {
    fee_rate: f64,
    break_even_after_first_target: bool,
}

impl TradeEngine {
    pub fn new(fee_rate: f64, break_even_after_first_target: bool) -> Self {
        Self {
            fee_rate,
            break_even_after_first_target,
        }
    }

    pub fn apply(
        &self,
        trade: &mut Trade,
        event: TradeEvent,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        if trade.status.is_terminal() {
            return Ok(Vec::new());
        }
        match event {
            TradeEvent::EntryFilled { step } => self.on_entry_filled(trade, step, at),
            TradeEvent::TargetReached { index } => self.on_target_reached(trade, index, at),
            TradeEvent::StopHit => self.on_stop_hit(trade, at),
            TradeEvent::ManualClose { price } => self.on_manual_close(trade, price, at),
            TradeEvent::OrderRejected { reason } => self.on_order_rejected(trade, reason, at),
        }
    }

    fn on_entry_filled(
        &self,
        trade: &mut Trade,
        step: usize,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        let Some(entry) = trade.entries.get(step) else {
            return Err(ExecutionError::InvalidTransition {
                state: trade.status,
                event: format!("entry_filled({step})"),
            });
        };
        if entry.filled || trade.entries_cancelled {
            return Ok(Vec::new());
        }

        let (price, size) = (entry.price, entry.size);
        trade.entries[step].filled = true;
        trade.position_size += size;
        trade.remaining_size += size;
        trade.avg_entry_price = trade.weighted_avg_entry();
        trade.realized_pnl -= price * size * self.fee_rate;

        if trade.status == TradeStatus::Pending {
            trade.status = TradeStatus::Active;
            trade.opened_at = Some(at);
            info!(trade_id = trade.id, symbol = %trade.symbol, price, "trade activated");
        }
        Ok(Vec::new())
    }

    fn on_target_reached(
        &self,
        trade: &mut Trade,
        index: usize,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        if trade.target_hit(index) {
            return Ok(Vec::new());
        }
        if trade.status == TradeStatus::Pending || index >= trade.targets.len() {
            return Err(ExecutionError::InvalidTransition {
                state: trade.status,
                event: format!("target_reached({index})"),
            });
        }

        let price = trade.targets[index];
        let is_last = trade.targets_hit.len() + 1 == trade.targets.len();
        let slice = if is_last {
            trade.remaining_size
        } else {
            (trade.position_size / trade.targets.len() as f64).min(trade.remaining_size)
        };

        trade.realized_pnl +=
            (price - trade.avg_entry_price) * slice * trade.direction.sign();
        trade.realized_pnl -= price * slice * self.fee_rate;
        trade.remaining_size -= slice;
        trade.targets_hit.push(index);
        trade.targets_hit.sort_unstable();

        let mut actions = Vec::new();
        if !trade.entries_cancelled {
            // First realized target: stop adding to the position.
            actions.extend(cancel_unfilled_entries(trade));
            if self.break_even_after_first_target && trade.stop_loss.is_some() {
                trade.stop_loss = Some(trade.avg_entry_price);
                actions.push(EngineAction::AmendStop {
                    price: trade.avg_entry_price,
                });
            }
        }

        if trade.all_targets_hit() || trade.remaining_size <= f64::EPSILON {
            trade.status = TradeStatus::Closed;
            trade.close_reason = Some(CloseReason::AllTargets);
            trade.closed_at = Some(at);
            info!(
                trade_id = trade.id,
                pnl = trade.realized_pnl,
                "all targets reached, trade closed"
            );
        }
        Ok(actions)
    }

    fn on_stop_hit(
        &self,
        trade: &mut Trade,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        if trade.status == TradeStatus::Pending {
            return Err(ExecutionError::InvalidTransition {
                state: trade.status,
                event: "stop_hit".to_string(),
            });
        }
        let Some(stop) = trade.stop_loss else {
            return Err(ExecutionError::InvalidTransition {
                state: trade.status,
                event: "stop_hit".to_string(),
            });
        };

        let slice = trade.remaining_size;
        trade.realized_pnl += (stop - trade.avg_entry_price) * slice * trade.direction.sign();
        trade.realized_pnl -= stop * slice * self.fee_rate;
        trade.remaining_size = 0.0;
        trade.status = TradeStatus::Closed;
        trade.close_reason = Some(CloseReason::StopLoss);
        trade.closed_at = Some(at);
        info!(
            trade_id = trade.id,
            pnl = trade.realized_pnl,
            "stop hit, trade closed"
        );
        Ok(cancel_unfilled_entries(trade))
    }

    fn on_manual_close(
        &self,
        trade: &mut Trade,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        let slice = trade.remaining_size;
        if slice > 0.0 {
            trade.realized_pnl +=
                (price - trade.avg_entry_price) * slice * trade.direction.sign();
            trade.realized_pnl -= price * slice * self.fee_rate;
            trade.remaining_size = 0.0;
        }
        trade.status = TradeStatus::Closed;
        trade.close_reason = Some(CloseReason::Manual);
        trade.closed_at = Some(at);
        Ok(cancel_unfilled_entries(trade))
    }

    /// Unrecoverable order errors are terminal from PENDING and ACTIVE
    /// alike. No retries here; whatever exposure remains is the caller's
    /// problem to flatten.
    fn on_order_rejected(
        &self,
        trade: &mut Trade,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, ExecutionError> {
        if trade.status == TradeStatus::Active && trade.remaining_size > 0.0 {
            warn!(
                trade_id = trade.id,
                remaining = trade.remaining_size,
                %reason,
                "failing trade with open exposure"
            );
        }
        trade.status = TradeStatus::Failed;
        trade.fail_reason = Some(reason);
        trade.closed_at = Some(at);
        Ok(cancel_unfilled_entries(trade))
    }
}

fn cancel_unfilled_entries(trade: &mut Trade) -> Vec<EngineAction> {
    trade.entries_cancelled = true;
    trade
        .entries
        .iter()
        .filter(|e| !e.filled)
        .filter_map(|e| e.order_id.clone())
        .map(EngineAction::CancelOrder)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trade;
    use crate::sizing::EntryOrder;
    use crate::test_helpers::{parsed_long_signal, parsed_short_signal};

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn engine() -> TradeEngine {
        TradeEngine::new(0.0, true)
    }

    // Two rungs of 0.1 base units each.
    fn long_trade() -> Trade {
        let ladder = vec![
            EntryOrder {
                price: 45_000.0,
                size: 4_500.0,
            },
            EntryOrder {
                price: 46_000.0,
                size: 4_600.0,
            },
        ];
        let mut trade = Trade::from_signal(1, &parsed_long_signal(), &ladder);
        for (i, entry) in trade.entries.iter_mut().enumerate() {
            entry.order_id = Some(format!("entry-{i}"));
        }
        trade
    }

    #[test]
    fn first_fill_activates_the_trade() {
        let engine = engine();
        let mut trade = long_trade();

        let actions = engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(trade.status, TradeStatus::Active);
        assert_eq!(trade.opened_at, Some(ts()));
        assert!((trade.avg_entry_price - 45_000.0).abs() < 1e-9);
        assert!((trade.position_size - 0.1).abs() < 1e-9);
    }

    #[test]
    fn second_fill_reweights_average_entry() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 1 }, ts())
            .unwrap();

        assert!((trade.avg_entry_price - 45_500.0).abs() < 1e-9);
        assert!((trade.position_size - 0.2).abs() < 1e-9);
        assert_eq!(trade.status, TradeStatus::Active);
    }

    #[test]
    fn replaying_a_fill_is_a_noop() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        let before = trade.position_size;
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        assert!((trade.position_size - before).abs() < 1e-12);
    }

    #[test]
    fn first_target_cancels_rungs_and_moves_stop_to_break_even() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();

        let actions = engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();

        assert!(actions.contains(&EngineAction::CancelOrder("entry-1".to_string())));
        assert!(actions.contains(&EngineAction::AmendStop { price: 45_000.0 }));
        assert_eq!(trade.stop_loss, Some(45_000.0));
        assert!(trade.entries_cancelled);
        assert_eq!(trade.targets_hit, vec![0]);
        // One third of the position realized at 47k from 45k.
        let slice = 0.1 / 3.0;
        assert!((trade.realized_pnl - 2_000.0 * slice).abs() < 1e-6);
        assert!((trade.remaining_size - (0.1 - slice)).abs() < 1e-9);
        assert_eq!(trade.status, TradeStatus::Active);
    }

    #[test]
    fn break_even_can_be_disabled() {
        let engine = TradeEngine::new(0.0, false);
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        let actions = engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();
        assert!(!actions
            .iter()
            .any(|a| matches!(a, EngineAction::AmendStop { .. })));
        assert_eq!(trade.stop_loss, Some(44_000.0));
    }

    #[test]
    fn fill_after_cancellation_is_ignored() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();

        // Races between the cancel and a fill resolve in favour of the cancel.
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 1 }, ts())
            .unwrap();
        assert!(!trade.entries[1].filled);
        assert!((trade.position_size - 0.1).abs() < 1e-9);
    }

    #[test]
    fn final_target_closes_the_remainder() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        for index in 0..3 {
            engine
                .apply(&mut trade, TradeEvent::TargetReached { index }, ts())
                .unwrap();
        }

        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason, Some(CloseReason::AllTargets));
        assert!(trade.remaining_size.abs() < 1e-12);
        // 0.1 split in thirds over +2000, +3000, +4000.
        let expected = (2_000.0 + 3_000.0 + 4_000.0) * (0.1 / 3.0);
        assert!((trade.realized_pnl - expected).abs() < 1e-6);
    }

    #[test]
    fn targets_may_arrive_out_of_order() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 1 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();
        assert_eq!(trade.targets_hit, vec![0, 1]);
        assert_eq!(trade.status, TradeStatus::Active);
    }

    #[test]
    fn stop_hit_closes_at_a_loss() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        let actions = engine.apply(&mut trade, TradeEvent::StopHit, ts()).unwrap();

        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason, Some(CloseReason::StopLoss));
        assert!((trade.realized_pnl - (44_000.0 - 45_000.0) * 0.1).abs() < 1e-6);
        assert!(actions.contains(&EngineAction::CancelOrder("entry-1".to_string())));
    }

    #[test]
    fn short_pnl_signs_are_mirrored() {
        let engine = engine();
        let ladder = vec![EntryOrder {
            price: 3_225.0,
            size: 3_225.0,
        }];
        let mut trade = Trade::from_signal(2, &parsed_short_signal(), &ladder);
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();
        // Short from 3225 to target 3100: profit.
        let slice = 1.0 / 3.0;
        assert!((trade.realized_pnl - 125.0 * slice).abs() < 1e-6);
    }

    #[test]
    fn fees_are_charged_per_leg() {
        let engine = TradeEngine::new(0.001, true);
        let ladder = vec![EntryOrder {
            price: 100.0,
            size: 100.0,
        }];
        let mut signal = parsed_long_signal();
        signal.targets = vec![110.0];
        signal.stop_loss = Some(90.0);
        let mut trade = Trade::from_signal(3, &signal, &ladder);

        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap();

        // +10 gross, minus 0.1% on the 100 entry and the 110 exit.
        let expected = 10.0 - 100.0 * 0.001 - 110.0 * 0.001;
        assert!((trade.realized_pnl - expected).abs() < 1e-9);
        assert_eq!(trade.status, TradeStatus::Closed);
    }

    #[test]
    fn target_before_activation_is_rejected() {
        let engine = engine();
        let mut trade = long_trade();
        let err = engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 0 }, ts())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidTransition { .. }));
    }

    #[test]
    fn rejection_before_any_fill_fails_the_trade() {
        let engine = engine();
        let mut trade = long_trade();
        let actions = engine
            .apply(
                &mut trade,
                TradeEvent::OrderRejected {
                    reason: "margin too low".to_string(),
                },
                ts(),
            )
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Failed);
        assert_eq!(trade.fail_reason.as_deref(), Some("margin too low"));
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn rejection_fails_even_an_active_trade() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(
                &mut trade,
                TradeEvent::OrderRejected {
                    reason: "rung rejected".to_string(),
                },
                ts(),
            )
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Failed);
        assert_eq!(trade.fail_reason.as_deref(), Some("rung rejected"));
    }

    #[test]
    fn manual_close_realizes_at_given_price() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine
            .apply(&mut trade, TradeEvent::ManualClose { price: 45_800.0 }, ts())
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.close_reason, Some(CloseReason::Manual));
        assert!((trade.realized_pnl - 800.0 * 0.1).abs() < 1e-6);
    }

    #[test]
    fn events_after_close_are_noops() {
        let engine = engine();
        let mut trade = long_trade();
        engine
            .apply(&mut trade, TradeEvent::EntryFilled { step: 0 }, ts())
            .unwrap();
        engine.apply(&mut trade, TradeEvent::StopHit, ts()).unwrap();
        let pnl = trade.realized_pnl;

        engine.apply(&mut trade, TradeEvent::StopHit, ts()).unwrap();
        engine
            .apply(&mut trade, TradeEvent::TargetReached { index: 2 }, ts())
            .unwrap();
        assert!((trade.realized_pnl - pnl).abs() < 1e-12);
        assert_eq!(trade.status, TradeStatus::Closed);
    }
}
