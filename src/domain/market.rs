use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single print from the tape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Immutable view of one symbol's market at a tick.
///
/// Produced once per tick by the market data collaborator and shared
/// (behind an `Arc`) with every agent evaluating that tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    /// Most recent trades, oldest first
    pub last_trades: Vec<Trade>,
    /// Rolling volatility estimate in price units (e.g. ATR)
    pub volatility: Decimal,
}

impl MarketSnapshot {
    /// Mid price between best bid and best ask
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.best_ask - self.best_bid
    }

    /// Last traded price, falling back to mid when the tape is empty
    pub fn last_price(&self) -> Decimal {
        self.last_trades
            .last()
            .map(|t| t.price)
            .unwrap_or_else(|| self.mid())
    }

    /// Volume-weighted average price of the recent trades
    pub fn vwap(&self) -> Option<Decimal> {
        let volume: Decimal = self.last_trades.iter().map(|t| t.size).sum();
        if volume <= Decimal::ZERO {
            return None;
        }
        let notional: Decimal = self.last_trades.iter().map(|t| t.price * t.size).sum();
        Some(notional / volume)
    }

    /// Age of the snapshot relative to `now` (never negative)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }

    /// A crossed or empty book cannot be priced
    pub fn is_priceable(&self) -> bool {
        self.best_bid > Decimal::ZERO && self.best_ask >= self.best_bid
    }
}
