use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::execution::{ExchangeClient, OrderRequest};
use crate::models::{OrderSide, OrderStatus, OrderType};

#[derive(Debug, Clone)]
struct PaperOrder {
    req: OrderRequest,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperState {
    last_price: f64,
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
}

/// In-memory exchange simulator. Handles are cheap clones over shared
/// state, so the price feed can be driven from outside while the bot owns
/// its own handle as a `Box<dyn ExchangeClient>`.
#[derive(Debug, Clone, Default)]
pub struct PaperExchange {
    state: Arc<Mutex<PaperState>>,
}

impl PaperExchange {
    pub fn new(initial_price: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                last_price: initial_price,
                ..Default::default()
            })),
        }
    }

    /// Push a new traded price and sweep resting orders against it.
    pub fn set_price(&self, price: f64) {
        let mut state = self.state.lock().unwrap();
        state.last_price = price;
        for (id, order) in state.orders.iter_mut() {
            if order.status != OrderStatus::Open {
                continue;
            }
            if order_fills_at(&order.req, price) {
                order.status = OrderStatus::Filled;
                debug!(order_id = %id, price, "paper order filled");
            }
        }
    }

    pub fn last_price(&self) -> f64 {
        self.state.lock().unwrap().last_price
    }

    pub fn open_order_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }
}

/// Limit buys fill at or below the limit, limit sells at or above. Stop
/// orders trigger on the adverse side. Market orders fill immediately at
/// the last price.
fn order_fills_at(req: &OrderRequest, price: f64) -> bool {
    match (req.order_type, req.side) {
        (OrderType::Market, _) => true,
        (OrderType::Limit, OrderSide::Buy) => req.price.is_some_and(|p| price <= p),
        (OrderType::Limit, OrderSide::Sell) => req.price.is_some_and(|p| price >= p),
        (OrderType::StopMarket, OrderSide::Sell) => req.price.is_some_and(|p| price <= p),
        (OrderType::StopMarket, OrderSide::Buy) => req.price.is_some_and(|p| price >= p),
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn place_order(&mut self, req: OrderRequest) -> Result<String> {
        if req.size <= 0.0 {
            return Err(anyhow!("order size must be positive"));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("paper-{}", state.next_id);

        // No tape yet (price 0) means nothing is marketable except markets.
        let status = if req.order_type == OrderType::Market
            || (state.last_price > 0.0 && order_fills_at(&req, state.last_price))
        {
            OrderStatus::Filled
        } else {
            OrderStatus::Open
        };
        debug!(order_id = %id, side = %req.side, ?status, "paper order placed");
        state.orders.insert(id.clone(), PaperOrder { req, status });
        Ok(id)
    }

    async fn cancel_order(&mut self, order_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;
        if order.status == OrderStatus::Open {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn order_status(&mut self, order_id: &str) -> Result<OrderStatus> {
        let state = self.state.lock().unwrap();
        state
            .orders
            .get(order_id)
            .map(|o| o.status)
            .ok_or_else(|| anyhow!("unknown order {order_id}"))
    }
}
