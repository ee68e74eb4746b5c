use tracing::debug;

use crate::config::RiskConfig;
use crate::error::ExecutionError;
use crate::models::{EntryZone, ParsedSignal};

/// One rung of a laddered entry: a limit price and the quote-denominated
/// notional committed at that price.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EntryOrder {
    pub price: f64,
    pub size: f64,
}

/// Turns a parsed signal plus the configured risk budget into a ladder of
/// entry orders. Pure and deterministic; all exchange interaction happens
/// downstream.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    risk: RiskConfig,
}

impl PositionSizer {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    /// Computes the entry ladder for a signal. When a stop loss is present
    /// the total notional is derived from the risk budget and stop distance;
    /// otherwise a flat fraction of the account is used. The returned orders
    /// never sum to more than the computed notional.
    pub fn size(
        &self,
        signal: &ParsedSignal,
        leverage: u32,
    ) -> Result<Vec<EntryOrder>, ExecutionError> {
        let zone = signal
            .entry_zone
            .ok_or_else(|| ExecutionError::NotActionable("signal has no entry zone".into()))?;
        let mid = zone.midpoint();

        let notional = match signal.stop_loss {
            Some(sl) if (mid - sl).abs() > f64::EPSILON => {
                let risk_amount = self.risk.account_balance * self.risk.risk_percentage;
                let qty = risk_amount / (mid - sl).abs() * leverage as f64;
                qty * mid
            }
            _ => {
                self.risk.account_balance * self.risk.default_position_fraction * leverage as f64
            }
        };

        let steps = self.risk.entry_steps.max(1);
        let prices = ladder_prices(zone, steps);
        let per_step = notional / prices.len() as f64;

        let orders: Vec<EntryOrder> = if per_step < self.risk.min_position_size {
            // Not enough budget to split: collapse to a single full-size
            // order at the midpoint, or give up if even that is too small.
            if notional < self.risk.min_position_size {
                return Err(ExecutionError::InsufficientRiskBudget {
                    min_notional: self.risk.min_position_size,
                });
            }
            vec![EntryOrder {
                price: mid,
                size: notional,
            }]
        } else {
            prices
                .into_iter()
                .map(|price| EntryOrder {
                    price,
                    size: per_step,
                })
                .collect()
        };

        debug!(
            notional,
            steps = orders.len(),
            leverage,
            "sized entry ladder"
        );
        Ok(orders)
    }
}

/// Equally spaced rung prices across the zone, bounds inclusive. A single
/// step lands on the midpoint; a degenerate zone repeats its price.
fn ladder_prices(zone: EntryZone, steps: usize) -> Vec<f64> {
    if steps == 1 || zone.width() < f64::EPSILON {
        return vec![zone.midpoint()];
    }
    let gap = zone.width() / (steps - 1) as f64;
    (0..steps).map(|i| zone.low + gap * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{default_test_config, parsed_long_signal};

    fn sizer() -> PositionSizer {
        PositionSizer::new(default_test_config().risk)
    }

    #[test]
    fn risk_based_notional_from_stop_distance() {
        // balance 10_000, risk 2% => 200 at risk; mid 45_500, sl 44_000 =>
        // qty = 200 / 1500 * 5, notional = qty * 45_500.
        let signal = parsed_long_signal();
        let orders = sizer().size(&signal, 5).unwrap();

        let qty = 200.0 / 1500.0 * 5.0;
        let expected = qty * 45_500.0;
        let total: f64 = orders.iter().map(|o| o.size).sum();
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn ladder_spans_zone_bounds_inclusive() {
        let signal = parsed_long_signal();
        let orders = sizer().size(&signal, 5).unwrap();

        assert_eq!(orders.len(), 3);
        assert!((orders[0].price - 45_000.0).abs() < 1e-9);
        assert!((orders[1].price - 45_500.0).abs() < 1e-9);
        assert!((orders[2].price - 46_000.0).abs() < 1e-9);
    }

    #[test]
    fn no_stop_falls_back_to_account_fraction() {
        let mut signal = parsed_long_signal();
        signal.stop_loss = None;
        let orders = sizer().size(&signal, 5).unwrap();

        // 10_000 * 0.1 * 5 = 5_000 across three rungs.
        let total: f64 = orders.iter().map(|o| o.size).sum();
        assert!((total - 5_000.0).abs() < 1e-6);
    }

    #[test]
    fn small_budget_collapses_to_single_order() {
        let mut cfg = default_test_config();
        cfg.risk.account_balance = 100.0;
        cfg.risk.default_position_fraction = 0.15;
        let sizer = PositionSizer::new(cfg.risk);

        let mut signal = parsed_long_signal();
        signal.stop_loss = None;
        // notional = 100 * 0.15 * 1 = 15: above the 10 minimum, but a three
        // way split would put each rung below it.
        let orders = sizer.size(&signal, 1).unwrap();
        assert_eq!(orders.len(), 1);
        assert!((orders[0].size - 15.0).abs() < 1e-9);
        assert!((orders[0].price - 45_500.0).abs() < 1e-9);
    }

    #[test]
    fn budget_below_minimum_is_rejected() {
        let mut cfg = default_test_config();
        cfg.risk.account_balance = 50.0;
        cfg.risk.default_position_fraction = 0.1;
        let sizer = PositionSizer::new(cfg.risk);

        let mut signal = parsed_long_signal();
        signal.stop_loss = None;
        let err = sizer.size(&signal, 1).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InsufficientRiskBudget { .. }
        ));
    }

    #[test]
    fn missing_entry_zone_is_not_actionable() {
        let mut signal = parsed_long_signal();
        signal.entry_zone = None;
        let err = sizer().size(&signal, 5).unwrap_err();
        assert!(matches!(err, ExecutionError::NotActionable(_)));
    }

    #[test]
    fn single_price_entry_produces_identical_rungs() {
        let prices = ladder_prices(EntryZone::single(100.0), 1);
        assert_eq!(prices, vec![100.0]);
    }
}
