pub mod engine;

pub use engine::{EngineAction, TradeEngine, TradeEvent};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{OrderSide, OrderStatus, OrderType};

/// An order as handed to the exchange. `price` is None for market orders;
/// `size` is in base units.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub size: f64,
    pub reduce_only: bool,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_order(&mut self, req: OrderRequest) -> Result<String>;
    async fn cancel_order(&mut self, order_id: &str) -> Result<()>;
    async fn order_status(&mut self, order_id: &str) -> Result<OrderStatus>;
}
