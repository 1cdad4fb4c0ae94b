use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Order, OrderStatus};
use crate::error::ExchangeError;

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Exchange view of one order, keyed by our client order id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    /// Cumulative filled quantity
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub reason: Option<String>,
}

impl OrderReport {
    pub fn new(client_order_id: &str, status: OrderStatus) -> Self {
        Self {
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            status,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            reason: None,
        }
    }

    pub fn with_fill(mut self, quantity: Decimal, avg_price: Decimal) -> Self {
        self.filled_quantity = quantity;
        self.avg_fill_price = Some(avg_price);
        self
    }

    pub fn with_exchange_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Abstract exchange connection. Transport and auth live behind it.
///
/// `place_order` must be idempotent on `Order::client_order_id`: a resubmitted
/// id returns the state of the original order instead of opening a new one.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    fn is_dry_run(&self) -> bool {
        false
    }

    async fn place_order(&self, order: &Order) -> ExchangeResult<OrderReport>;

    /// Cancel a live order. A report with a terminal status other than
    /// `Cancelled` means the order finished before the cancel landed.
    async fn cancel_order(&self, client_order_id: &str) -> ExchangeResult<OrderReport>;

    async fn query_status(&self, client_order_id: &str) -> ExchangeResult<OrderReport>;
}
