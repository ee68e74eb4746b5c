use thiserror::Error;

use crate::models::TradeStatus;

/// Fatal conditions raised on the execution path. Field-level parse problems
/// are NOT errors in this sense — they accumulate on the signal itself.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("signal is not actionable: {0}")]
    NotActionable(String),

    #[error("insufficient risk budget: no entry step meets the minimum notional of {min_notional}")]
    InsufficientRiskBudget { min_notional: f64 },

    #[error("unrecoverable exchange error: {0}")]
    UnrecoverableExchange(String),

    #[error("illegal event {event} for trade in state {state}")]
    InvalidTransition { state: TradeStatus, event: String },
}
