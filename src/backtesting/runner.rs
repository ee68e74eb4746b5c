use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ExecutionError;
use crate::models::{BacktestStatus, Candle, CandleSeries, Direction, Trade, TradeStatus};
use crate::parser::SignalParser;
use crate::sizing::PositionSizer;
use crate::execution::{TradeEngine, TradeEvent};

use super::report::BacktestReport;

/// One completed (or failed) backtest run, with its lifecycle status and
/// every simulated trade kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backtest {
    pub id: u64,
    pub status: BacktestStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub trades: Vec<Trade>,
    pub report: Option<BacktestReport>,
}

/// Replays parsed signals against a candle series, driving the same
/// transition engine the live bot uses. Same signals plus same candles
/// always produce identical output.
pub struct BacktestRunner {
    parser: SignalParser,
    sizer: PositionSizer,
    engine: TradeEngine,
    initial_balance: f64,
    next_id: u64,
    stop: Arc<AtomicBool>,
}

impl BacktestRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            parser: SignalParser::new(config),
            sizer: PositionSizer::new(config.risk.clone()),
            engine: TradeEngine::new(config.fee_rate, config.break_even_after_first_target),
            initial_balance: config.risk.account_balance,
            next_id: 1,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation: flip the returned flag and the run stops
    /// at the next candle boundary with a Failed result.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the given raw signal texts against the candle feed and return
    /// the finished record.
    pub fn run(&mut self, signal_texts: &[&str], candles: &CandleSeries) -> Backtest {
        let mut record = Backtest {
            id: self.next_id,
            status: BacktestStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            trades: Vec::new(),
            report: None,
        };
        self.next_id += 1;

        match self.simulate(signal_texts, candles) {
            Ok((trades, skipped)) => {
                let report = BacktestReport::from_trades(
                    &trades,
                    self.initial_balance,
                    signal_texts.len(),
                    skipped,
                    candles
                        .first()
                        .map(|c| c.timestamp)
                        .unwrap_or(record.started_at),
                    candles
                        .last()
                        .map(|c| c.timestamp)
                        .unwrap_or(record.started_at),
                );
                info!(
                    backtest_id = record.id,
                    trades = trades.len(),
                    pnl = report.total_pnl,
                    "backtest completed"
                );
                record.status = BacktestStatus::Completed;
                record.trades = trades;
                record.report = Some(report);
            }
            Err(e) => {
                record.status = BacktestStatus::Failed;
                record.error = Some(format!("{e:#}"));
            }
        }
        record.finished_at = Some(Utc::now());
        record
    }

    fn simulate(
        &self,
        signal_texts: &[&str],
        candles: &CandleSeries,
    ) -> Result<(Vec<Trade>, usize)> {
        if candles.is_empty() {
            bail!("no candles to replay");
        }

        let mut trades: Vec<Trade> = Vec::new();
        let mut skipped = 0usize;
        for (n, text) in signal_texts.iter().enumerate() {
            let mut signal = self.parser.parse(text);
            signal.id = n as u64 + 1;
            if !signal.is_actionable() {
                debug!(signal = n + 1, "skipping non-actionable signal");
                skipped += 1;
                continue;
            }
            match self.sizer.size(&signal, signal.leverage) {
                Ok(ladder) => {
                    trades.push(Trade::from_signal(n as u64 + 1, &signal, &ladder));
                }
                Err(ExecutionError::InsufficientRiskBudget { .. }) => {
                    debug!(signal = n + 1, "skipping signal below minimum size");
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Candle index of each trade's first fill; exits are only evaluated
        // strictly after it, so a single candle never both fills and exits.
        let mut entry_index: Vec<Option<usize>> = vec![None; trades.len()];

        for (ci, candle) in candles.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                bail!("cancelled after {ci} of {} candles", candles.len());
            }
            for (ti, trade) in trades.iter_mut().enumerate() {
                if trade.status.is_terminal() {
                    continue;
                }
                self.step_entries(trade, candle, ci, &mut entry_index[ti])?;
                if let Some(entered) = entry_index[ti] {
                    if ci > entered {
                        self.step_exits(trade, candle)?;
                    }
                }
            }
        }

        // Whatever is still open when the feed runs out is closed at the
        // final close, as if the operator flattened the book.
        let last = candles.last().expect("non-empty feed");
        for trade in trades.iter_mut() {
            if trade.status == TradeStatus::Active {
                self.engine.apply(
                    trade,
                    TradeEvent::ManualClose { price: last.close },
                    last.timestamp,
                )?;
            }
        }
        Ok((trades, skipped))
    }

    fn step_entries(
        &self,
        trade: &mut Trade,
        candle: &Candle,
        ci: usize,
        entry_index: &mut Option<usize>,
    ) -> Result<()> {
        if trade.entries_cancelled {
            return Ok(());
        }
        for step in 0..trade.entries.len() {
            if trade.entries[step].filled || !candle.touches(trade.entries[step].price) {
                continue;
            }
            self.engine
                .apply(trade, TradeEvent::EntryFilled { step }, candle.timestamp)?;
            entry_index.get_or_insert(ci);
        }
        Ok(())
    }

    /// Stop is checked before targets: a candle wide enough to sweep both
    /// resolves as a stop-out.
    fn step_exits(&self, trade: &mut Trade, candle: &Candle) -> Result<()> {
        if let Some(stop) = trade.stop_loss {
            let stopped = match trade.direction {
                Direction::Long => candle.low <= stop,
                Direction::Short => candle.high >= stop,
            };
            if stopped {
                self.engine
                    .apply(trade, TradeEvent::StopHit, candle.timestamp)?;
                return Ok(());
            }
        }

        for index in 0..trade.targets.len() {
            if trade.status.is_terminal() || trade.target_hit(index) {
                continue;
            }
            let reached = match trade.direction {
                Direction::Long => candle.high >= trade.targets[index],
                Direction::Short => candle.low <= trade.targets[index],
            };
            if reached {
                self.engine
                    .apply(trade, TradeEvent::TargetReached { index }, candle.timestamp)?;
            }
        }
        Ok(())
    }
}
