//! In-process exchange for dry runs
//!
//! Market orders fill at the latest mark, limit orders fill once the mark
//! crosses them. Fills can be delayed by a number of status polls to mimic
//! an exchange that acknowledges first and fills later.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, info};

use super::traits::{ExchangeClient, ExchangeResult, OrderReport};
use crate::domain::{Order, OrderSide, OrderStatus, OrderType};
use crate::error::ExchangeError;

#[derive(Debug, Clone)]
struct PaperOrder {
    side: OrderSide,
    order_type: OrderType,
    symbol: String,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    polls_until_fill: u32,
    report: OrderReport,
}

pub struct PaperExchange {
    marks: DashMap<String, Decimal>,
    orders: DashMap<String, PaperOrder>,
    symbols: Option<HashSet<String>>,
    fill_after_polls: u32,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            marks: DashMap::new(),
            orders: DashMap::new(),
            symbols: None,
            fill_after_polls: 0,
        }
    }

    /// Reject anything outside `symbols` as an invalid symbol
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = Some(symbols.into_iter().map(Into::into).collect());
        self
    }

    /// Acknowledge first and fill on the n-th status query
    pub fn with_fill_after_polls(mut self, polls: u32) -> Self {
        self.fill_after_polls = polls;
        self
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.marks.insert(symbol.to_string(), price);
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    fn crossing_price(&self, order: &PaperOrder) -> Option<Decimal> {
        let mark = *self.marks.get(&order.symbol)?;
        match (order.order_type, order.limit_price) {
            (OrderType::Market, _) => Some(mark),
            (OrderType::Limit, Some(limit)) => match order.side {
                OrderSide::Buy if mark <= limit => Some(limit.min(mark)),
                OrderSide::Sell if mark >= limit => Some(limit.max(mark)),
                _ => None,
            },
            (OrderType::Limit, None) => None,
        }
    }

    fn try_fill(&self, order: &mut PaperOrder) {
        if order.report.is_terminal() || order.polls_until_fill > 0 {
            return;
        }
        if let Some(price) = self.crossing_price(order) {
            order.report.status = OrderStatus::Filled;
            order.report.filled_quantity = order.quantity;
            order.report.avg_fill_price = Some(price);
            info!(
                client_order_id = %order.report.client_order_id,
                symbol = %order.symbol,
                side = %order.side,
                quantity = %order.quantity,
                price = %price,
                "Paper fill"
            );
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn place_order(&self, order: &Order) -> ExchangeResult<OrderReport> {
        if let Some(existing) = self.orders.get(&order.client_order_id) {
            debug!(
                client_order_id = %order.client_order_id,
                "Duplicate submission, returning original report"
            );
            return Ok(existing.report.clone());
        }

        if let Some(symbols) = &self.symbols {
            if !symbols.contains(&order.symbol) {
                return Err(ExchangeError::InvalidSymbol(order.symbol.clone()));
            }
        }
        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "quantity {} must be positive",
                order.quantity
            )));
        }
        if order.order_type == OrderType::Market && !self.marks.contains_key(&order.symbol) {
            return Err(ExchangeError::Rejected(format!(
                "no market for {}",
                order.symbol
            )));
        }

        let mut paper = PaperOrder {
            side: order.side,
            order_type: order.order_type,
            symbol: order.symbol.clone(),
            quantity: order.quantity,
            limit_price: order.limit_price,
            polls_until_fill: self.fill_after_polls,
            report: OrderReport::new(&order.client_order_id, OrderStatus::Acknowledged)
                .with_exchange_id(format!("paper-{}", self.orders.len() + 1)),
        };
        self.try_fill(&mut paper);

        let report = paper.report.clone();
        self.orders.insert(order.client_order_id.clone(), paper);
        Ok(report)
    }

    async fn cancel_order(&self, client_order_id: &str) -> ExchangeResult<OrderReport> {
        let mut order = self
            .orders
            .get_mut(client_order_id)
            .ok_or_else(|| ExchangeError::UnknownOrder(client_order_id.to_string()))?;
        if !order.report.is_terminal() {
            order.report.status = OrderStatus::Cancelled;
            order.report.reason = Some("cancelled by client".to_string());
        }
        Ok(order.report.clone())
    }

    async fn query_status(&self, client_order_id: &str) -> ExchangeResult<OrderReport> {
        let mut entry = self
            .orders
            .get_mut(client_order_id)
            .ok_or_else(|| ExchangeError::UnknownOrder(client_order_id.to_string()))?;
        let order = entry.value_mut();
        order.polls_until_fill = order.polls_until_fill.saturating_sub(1);
        self.try_fill(order);
        Ok(order.report.clone())
    }
}
