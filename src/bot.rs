use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;
use crate::error::ExecutionError;
use crate::execution::{EngineAction, ExchangeClient, OrderRequest, TradeEngine, TradeEvent};
use crate::models::{OrderStatus, OrderType, Trade, TradeStatus};
use crate::parser::SignalParser;
use crate::sizing::PositionSizer;

/// Live orchestrator: accepts raw signal text, turns it into managed
/// trades, and polls the exchange to feed order updates through the
/// transition engine. State survives restarts via a JSON snapshot.
pub struct SignalBot {
    config: SharedConfig,
    exchange: Box<dyn ExchangeClient>,
    parser: SignalParser,
    sizer: PositionSizer,
    engine: TradeEngine,
    trades: Vec<Trade>,
    /// trade id -> (target index, order id)
    target_orders: HashMap<u64, Vec<(usize, String)>>,
    /// trade id -> stop order id
    stop_orders: HashMap<u64, String>,
    next_trade_id: u64,
    state_file: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct BotState {
    trades: Vec<Trade>,
    target_orders: HashMap<u64, Vec<(usize, String)>>,
    stop_orders: HashMap<u64, String>,
    next_trade_id: u64,
}

impl SignalBot {
    pub async fn new(config: SharedConfig, exchange: Box<dyn ExchangeClient>) -> Self {
        let cfg = config.read().await;
        info!("{}", "=".repeat(60));
        info!("Signal bot starting up");
        info!("Default pair: {}", cfg.default_pair);
        info!(
            "Risk: {:.1}% of {:.2}, {} entry steps",
            cfg.risk.risk_percentage * 100.0,
            cfg.risk.account_balance,
            cfg.risk.entry_steps
        );
        info!("{}", "=".repeat(60));

        let parser = SignalParser::new(&cfg);
        let sizer = PositionSizer::new(cfg.risk.clone());
        let engine = TradeEngine::new(cfg.fee_rate, cfg.break_even_after_first_target);
        let state_file = Path::new(&cfg.log_dir).join("trades.json");
        drop(cfg);

        let mut bot = Self {
            config,
            exchange,
            parser,
            sizer,
            engine,
            trades: Vec::new(),
            target_orders: HashMap::new(),
            stop_orders: HashMap::new(),
            next_trade_id: 1,
            state_file,
        };
        bot.load_state();
        bot
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Bot is now running. Press Ctrl+C to stop.");
        let interval = self.config.read().await.poll_interval_secs;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down, {} trade(s) tracked", self.trades.len());
                    self.save_state();
                    return Ok(());
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_secs(interval)) => {
                    if let Err(e) = self.poll().await {
                        error!("Poll failed: {e:#}");
                    }
                }
            }
        }
    }

    /// Parse raw text and, if actionable, open a managed trade with the
    /// entry ladder resting on the exchange. Returns the trade id.
    pub async fn submit_signal(&mut self, text: &str) -> Result<u64> {
        let signal = self.parser.parse(text);
        if !signal.is_actionable() {
            let reasons: Vec<String> = signal
                .parse_errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            bail!("signal not actionable: {}", reasons.join("; "));
        }
        for warning in signal.warnings() {
            warn!(field = %warning.field, "{}", warning.message);
        }

        let ladder = self.sizer.size(&signal, signal.leverage)?;
        let mut trade = Trade::from_signal(self.next_trade_id, &signal, &ladder);
        self.next_trade_id += 1;

        for step in trade.entries.iter_mut() {
            let id = self
                .exchange
                .place_order(OrderRequest {
                    symbol: trade.symbol.clone(),
                    side: trade.direction.entry_side(),
                    order_type: OrderType::Limit,
                    price: Some(step.price),
                    size: step.size,
                    reduce_only: false,
                })
                .await
                .context("placing entry order")?;
            step.order_id = Some(id);
        }

        info!(
            trade_id = trade.id,
            symbol = %trade.symbol,
            direction = %trade.direction,
            rungs = trade.entries.len(),
            "trade submitted"
        );
        let id = trade.id;
        self.trades.push(trade);
        self.save_state();
        Ok(id)
    }

    /// One pass over all live trades: translate order status changes into
    /// engine events and carry out the resulting exchange actions.
    pub async fn poll(&mut self) -> Result<()> {
        let mut dirty = false;
        for i in 0..self.trades.len() {
            if self.trades[i].status.is_terminal() {
                continue;
            }
            dirty |= self.poll_trade(i).await?;
        }
        if dirty {
            self.save_state();
        }
        Ok(())
    }

    async fn poll_trade(&mut self, i: usize) -> Result<bool> {
        let mut events: Vec<TradeEvent> = Vec::new();
        let trade_id = self.trades[i].id;
        let was_pending = self.trades[i].status == TradeStatus::Pending;

        // Entry rungs. An order cancelled by anyone but us is treated the
        // same as a rejection.
        if !self.trades[i].entries_cancelled {
            for step in 0..self.trades[i].entries.len() {
                if self.trades[i].entries[step].filled {
                    continue;
                }
                let Some(order_id) = self.trades[i].entries[step].order_id.clone() else {
                    continue;
                };
                match self.order_status(&order_id).await? {
                    OrderStatus::Filled => events.push(TradeEvent::EntryFilled { step }),
                    OrderStatus::Rejected => events.push(TradeEvent::OrderRejected {
                        reason: format!("entry order {order_id} rejected"),
                    }),
                    OrderStatus::Cancelled => events.push(TradeEvent::OrderRejected {
                        reason: format!("entry order {order_id} cancelled externally"),
                    }),
                    OrderStatus::Open | OrderStatus::Partial => {}
                }
            }
        }

        // Exit orders, checked stop first so a candle that sweeps both
        // resolves pessimistically.
        if let Some(stop_id) = self.stop_orders.get(&trade_id).cloned() {
            match self.order_status(&stop_id).await? {
                OrderStatus::Filled => events.push(TradeEvent::StopHit),
                OrderStatus::Rejected | OrderStatus::Cancelled => {
                    events.push(TradeEvent::OrderRejected {
                        reason: format!("stop order {stop_id} lost"),
                    })
                }
                OrderStatus::Open | OrderStatus::Partial => {}
            }
        }
        for (index, order_id) in self
            .target_orders
            .get(&trade_id)
            .cloned()
            .unwrap_or_default()
        {
            if self.trades[i].target_hit(index) {
                continue;
            }
            match self.order_status(&order_id).await? {
                OrderStatus::Filled => events.push(TradeEvent::TargetReached { index }),
                OrderStatus::Rejected | OrderStatus::Cancelled => {
                    events.push(TradeEvent::OrderRejected {
                        reason: format!("target order {order_id} lost"),
                    })
                }
                OrderStatus::Open | OrderStatus::Partial => {}
            }
        }

        let mut dirty = false;
        for event in events {
            debug!(trade_id, event = %event, "applying event");
            let actions = self.engine.apply(&mut self.trades[i], event, Utc::now())?;
            dirty = true;
            for action in actions {
                self.execute_action(i, action).await?;
            }
        }

        // First fill just happened: arm the exit orders.
        if was_pending && self.trades[i].status == TradeStatus::Active {
            self.place_exit_orders(i).await?;
        }
        if self.trades[i].status.is_terminal() {
            self.sweep_exit_orders(trade_id).await;
        }
        Ok(dirty)
    }

    /// A status query the exchange cannot answer is an unrecoverable
    /// exchange error, never silently skipped.
    async fn order_status(&mut self, order_id: &str) -> Result<OrderStatus> {
        self.exchange.order_status(order_id).await.map_err(|e| {
            ExecutionError::UnrecoverableExchange(format!("order {order_id}: {e:#}")).into()
        })
    }

    async fn execute_action(&mut self, i: usize, action: EngineAction) -> Result<()> {
        match action {
            EngineAction::CancelOrder(order_id) => {
                self.exchange
                    .cancel_order(&order_id)
                    .await
                    .context("cancelling order")?;
            }
            EngineAction::AmendStop { price } => {
                let trade_id = self.trades[i].id;
                if let Some(old) = self.stop_orders.remove(&trade_id) {
                    self.exchange.cancel_order(&old).await.ok();
                }
                let id = self
                    .exchange
                    .place_order(OrderRequest {
                        symbol: self.trades[i].symbol.clone(),
                        side: self.trades[i].direction.exit_side(),
                        order_type: OrderType::StopMarket,
                        price: Some(price),
                        size: self.trades[i].remaining_size,
                        reduce_only: true,
                    })
                    .await
                    .context("amending stop order")?;
                self.stop_orders.insert(trade_id, id);
            }
        }
        Ok(())
    }

    async fn place_exit_orders(&mut self, i: usize) -> Result<()> {
        let trade_id = self.trades[i].id;
        let symbol = self.trades[i].symbol.clone();
        let side = self.trades[i].direction.exit_side();
        let position = self.trades[i].position_size;

        if let Some(stop) = self.trades[i].stop_loss {
            let id = self
                .exchange
                .place_order(OrderRequest {
                    symbol: symbol.clone(),
                    side,
                    order_type: OrderType::StopMarket,
                    price: Some(stop),
                    size: position,
                    reduce_only: true,
                })
                .await
                .context("placing stop order")?;
            self.stop_orders.insert(trade_id, id);
        }

        let targets = self.trades[i].targets.clone();
        if targets.is_empty() {
            return Ok(());
        }
        let slice = position / targets.len() as f64;
        let mut placed = Vec::with_capacity(targets.len());
        for (index, price) in targets.iter().enumerate() {
            let id = self
                .exchange
                .place_order(OrderRequest {
                    symbol: symbol.clone(),
                    side,
                    order_type: OrderType::Limit,
                    price: Some(*price),
                    size: slice,
                    reduce_only: true,
                })
                .await
                .context("placing target order")?;
            placed.push((index, id));
        }
        self.target_orders.insert(trade_id, placed);
        Ok(())
    }

    /// Cancel whatever exit orders remain for a finished trade.
    async fn sweep_exit_orders(&mut self, trade_id: u64) {
        if let Some(stop_id) = self.stop_orders.remove(&trade_id) {
            self.exchange.cancel_order(&stop_id).await.ok();
        }
        for (_, order_id) in self.target_orders.remove(&trade_id).unwrap_or_default() {
            self.exchange.cancel_order(&order_id).await.ok();
        }
    }

    /// Close a live trade at the given price, cancelling everything resting.
    pub async fn close_trade(&mut self, trade_id: u64, price: f64) -> Result<()> {
        let Some(i) = self.trades.iter().position(|t| t.id == trade_id) else {
            bail!("unknown trade {trade_id}");
        };
        let actions = self.engine.apply(
            &mut self.trades[i],
            TradeEvent::ManualClose { price },
            Utc::now(),
        )?;
        for action in actions {
            self.execute_action(i, action).await?;
        }
        self.sweep_exit_orders(trade_id).await;
        self.save_state();
        Ok(())
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn trade(&self, trade_id: u64) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == trade_id)
    }

    fn save_state(&self) {
        let _ = fs::create_dir_all(
            self.state_file.parent().unwrap_or_else(|| Path::new("logs")),
        );
        let state = BotState {
            trades: self.trades.clone(),
            target_orders: self.target_orders.clone(),
            stop_orders: self.stop_orders.clone(),
            next_trade_id: self.next_trade_id,
        };
        match serde_json::to_string_pretty(&state) {
            Ok(json) => {
                let _ = fs::write(&self.state_file, json);
            }
            Err(e) => warn!("Failed to serialize bot state: {e}"),
        }
    }

    fn load_state(&mut self) {
        if let Ok(content) = fs::read_to_string(&self.state_file) {
            match serde_json::from_str::<BotState>(&content) {
                Ok(state) => {
                    info!(
                        "Restored {} trade(s) from {}",
                        state.trades.len(),
                        self.state_file.display()
                    );
                    self.trades = state.trades;
                    self.target_orders = state.target_orders;
                    self.stop_orders = state.stop_orders;
                    self.next_trade_id = state.next_trade_id.max(1);
                }
                Err(e) => warn!("Ignoring unreadable bot state: {e}"),
            }
        }
    }
}
