use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CloseReason, Trade, TradeStatus};

/// Profit below this absolute size counts as break-even rather than a win
/// or a loss.
const BREAK_EVEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    // Period
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    // Signals
    pub total_signals: usize,
    pub skipped_signals: usize,

    // Trades
    pub total_trades: usize,
    pub pending_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub break_even_trades: usize,
    pub stopped_out: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub best_trade: f64,
    pub worst_trade: f64,

    // Performance
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    /// Equity after each closed trade, ordered by close time.
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl BacktestReport {
    pub fn from_trades(
        trades: &[Trade],
        initial_balance: f64,
        total_signals: usize,
        skipped_signals: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let mut closed: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .collect();
        closed.sort_by_key(|t| t.closed_at);

        let pending_trades = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Pending)
            .count();

        let wins: Vec<f64> = closed
            .iter()
            .filter(|t| t.realized_pnl > BREAK_EVEN_EPSILON)
            .map(|t| t.realized_pnl)
            .collect();
        let losses: Vec<f64> = closed
            .iter()
            .filter(|t| t.realized_pnl < -BREAK_EVEN_EPSILON)
            .map(|t| t.realized_pnl)
            .collect();
        let break_even_trades = closed.len() - wins.len() - losses.len();
        let stopped_out = closed
            .iter()
            .filter(|t| t.close_reason == Some(CloseReason::StopLoss))
            .count();

        // Break-even and never-filled trades don't dilute the win rate.
        let decided = wins.len() + losses.len();
        let win_rate = if decided > 0 {
            wins.len() as f64 / decided as f64 * 100.0
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };
        let profit_factor = if !losses.is_empty() {
            wins.iter().sum::<f64>() / losses.iter().sum::<f64>().abs()
        } else if !wins.is_empty() {
            f64::INFINITY
        } else {
            0.0
        };

        let total_pnl: f64 = closed.iter().map(|t| t.realized_pnl).sum();
        let mut equity = initial_balance;
        let mut peak = initial_balance;
        let mut max_drawdown = 0.0f64;
        let mut equity_curve = Vec::with_capacity(closed.len());
        for trade in &closed {
            equity += trade.realized_pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
            if let Some(at) = trade.closed_at {
                equity_curve.push((at, equity));
            }
        }

        let best_trade = closed
            .iter()
            .map(|t| t.realized_pnl)
            .fold(f64::NEG_INFINITY, f64::max);
        let worst_trade = closed
            .iter()
            .map(|t| t.realized_pnl)
            .fold(f64::INFINITY, f64::min);

        BacktestReport {
            start,
            end,
            total_signals,
            skipped_signals,
            total_trades: trades.len(),
            pending_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            break_even_trades,
            stopped_out,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            best_trade: if closed.is_empty() { 0.0 } else { best_trade },
            worst_trade: if closed.is_empty() { 0.0 } else { worst_trade },
            initial_balance,
            final_balance: equity,
            total_pnl,
            total_return_pct: if initial_balance > 0.0 {
                total_pnl / initial_balance * 100.0
            } else {
                0.0
            },
            max_drawdown,
            max_drawdown_pct: if peak > 0.0 {
                max_drawdown / peak * 100.0
            } else {
                0.0
            },
            equity_curve,
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("BACKTEST RESULTS");
        println!("{}", "=".repeat(70));
        println!(
            "Period:          {} to {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        );
        println!(
            "Signals:         {} ({} skipped)",
            self.total_signals, self.skipped_signals
        );
        println!(
            "Trades:          {} ({} never filled)",
            self.total_trades, self.pending_trades
        );
        println!(
            "Win rate:        {:.1}% ({}W / {}L / {}BE)",
            self.win_rate, self.winning_trades, self.losing_trades, self.break_even_trades
        );
        println!("Avg win/loss:    {:+.2} / {:+.2}", self.avg_win, self.avg_loss);
        println!("Profit factor:   {:.2}", self.profit_factor);
        println!(
            "Best/worst:      {:+.2} / {:+.2}",
            self.best_trade, self.worst_trade
        );
        println!(
            "PnL:             {:+.2} ({:+.2}%)",
            self.total_pnl, self.total_return_pct
        );
        println!(
            "Max drawdown:    {:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
        println!("{}", "=".repeat(70));
    }
}
