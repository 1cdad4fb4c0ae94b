use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::signal::SignalSide;
use crate::error::{QuorumError, Result};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Order side that expresses a directional signal; FLAT has none
    pub fn from_signal(side: SignalSide) -> Option<Self> {
        match side {
            SignalSide::Long => Some(OrderSide::Buy),
            SignalSide::Short => Some(OrderSide::Sell),
            SignalSide::Flat => None,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, not yet handed to the exchange
    Pending,
    /// Handed to the exchange client, no ack yet
    Submitted,
    /// Exchange accepted the order
    Acknowledged,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    /// Gave up (retries exhausted, timeout, breaker open)
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Acknowledged => "ACKNOWLEDGED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Rejected
                | OrderStatus::Cancelled
                | OrderStatus::Failed
        )
    }

    /// Live on the exchange (or possibly so) and needing reconciliation after a restart
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OrderStatus::Submitted | OrderStatus::Acknowledged | OrderStatus::PartiallyFilled
        )
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            // From Pending
            (Pending, Submitted) => true,
            (Pending, Failed) => true, // breaker open, never sent
            (Pending, Cancelled) => true,

            // From Submitted (fills can be observed before the ack on reconciliation)
            (Submitted, Acknowledged) => true,
            (Submitted, PartiallyFilled) => true,
            (Submitted, Filled) => true,
            (Submitted, Rejected) => true,
            (Submitted, Cancelled) => true,
            (Submitted, Failed) => true,

            // From Acknowledged
            (Acknowledged, PartiallyFilled) => true,
            (Acknowledged, Filled) => true,
            (Acknowledged, Rejected) => true,
            (Acknowledged, Cancelled) => true,
            (Acknowledged, Failed) => true,

            // From PartiallyFilled
            (PartiallyFilled, PartiallyFilled) => true,
            (PartiallyFilled, Filled) => true,
            (PartiallyFilled, Cancelled) => true,

            // Terminal states never move
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Order owned by the execution state machine for its whole lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    /// Consensus decision that produced this order
    pub decision_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price, `None` for market orders
    pub limit_price: Option<Decimal>,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub history: Vec<OrderTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn market(client_order_id: String, symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        let now = Utc::now();
        Self {
            client_order_id,
            exchange_order_id: None,
            decision_id: None,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            retry_count: 0,
            last_error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn limit(
        client_order_id: String,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        let mut order = Self::market(client_order_id, symbol, side, quantity);
        order.order_type = OrderType::Limit;
        order.limit_price = Some(price);
        order
    }

    pub fn with_decision(mut self, decision_id: Uuid) -> Self {
        self.decision_id = Some(decision_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Move to `to`, recording the change.
    ///
    /// Transitions outside the table (including any move out of a terminal
    /// state) are logic bugs: they are logged at error level and returned as
    /// `InvalidStateTransition` without touching the order.
    pub fn transition(&mut self, to: OrderStatus, note: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            error!(
                client_order_id = %self.client_order_id,
                from = %self.status,
                to = %to,
                "Invalid order state transition"
            );
            return Err(QuorumError::InvalidStateTransition {
                client_order_id: self.client_order_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        self.history.push(OrderTransition {
            from: self.status,
            to,
            at: now,
            note,
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Record cumulative fill information reported by the exchange.
    ///
    /// Returns the newly filled quantity since the previous report.
    pub fn record_fill(&mut self, cumulative_qty: Decimal, avg_price: Option<Decimal>) -> Decimal {
        let cumulative = cumulative_qty.min(self.quantity);
        let delta = (cumulative - self.filled_quantity).max(Decimal::ZERO);
        if delta > Decimal::ZERO {
            self.filled_quantity = cumulative;
            if avg_price.is_some() {
                self.avg_fill_price = avg_price;
            }
            self.updated_at = Utc::now();
        }
        delta
    }

    /// Notional at the best known price
    pub fn notional(&self, reference_price: Decimal) -> Decimal {
        let price = self
            .avg_fill_price
            .or(self.limit_price)
            .unwrap_or(reference_price);
        price * self.quantity
    }
}
