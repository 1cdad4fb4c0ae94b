use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::order::OrderSide;
use super::signal::SignalSide;

/// Net position in one symbol. Mutated only by confirmed fills and marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive long, negative short
    pub net_quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Realized PnL accumulated since the position was last flat
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Effect of applying a fill to a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEffect {
    /// PnL realized by this fill
    pub realized_pnl: Decimal,
    /// The position went flat (or flipped), closing the previous trade
    pub closed: bool,
    /// Realized PnL of the whole closed trade, when `closed`
    pub trade_pnl: Option<Decimal>,
}

impl Position {
    pub fn new(symbol: &str, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            net_quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: at,
            updated_at: at,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.is_zero()
    }

    pub fn direction(&self) -> SignalSide {
        if self.net_quantity > Decimal::ZERO {
            SignalSide::Long
        } else if self.net_quantity < Decimal::ZERO {
            SignalSide::Short
        } else {
            SignalSide::Flat
        }
    }

    /// Absolute notional at the latest mark (entry price before the first mark)
    pub fn notional(&self) -> Decimal {
        let price = if self.mark_price > Decimal::ZERO {
            self.mark_price
        } else {
            self.avg_entry_price
        };
        self.net_quantity.abs() * price
    }

    pub fn mark(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.mark_price = price;
        self.unrealized_pnl = (price - self.avg_entry_price) * self.net_quantity;
        self.updated_at = at;
    }

    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> FillEffect {
        let signed = quantity * side.sign();
        let old = self.net_quantity;
        let mut realized = Decimal::ZERO;

        if old.is_zero() || old.is_sign_positive() == signed.is_sign_positive() {
            // Opening or adding
            let total = old.abs() + quantity;
            if total > Decimal::ZERO {
                self.avg_entry_price =
                    (old.abs() * self.avg_entry_price + quantity * price) / total;
            }
            if old.is_zero() {
                self.opened_at = at;
                self.realized_pnl = Decimal::ZERO;
            }
            self.net_quantity = old + signed;
        } else {
            // Reducing, closing or flipping
            let closing = quantity.min(old.abs());
            let direction = if old > Decimal::ZERO {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = closing * (price - self.avg_entry_price) * direction;
            self.realized_pnl += realized;
            self.net_quantity = old + signed;
            if self.net_quantity.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
            } else if self.net_quantity.is_sign_positive() != old.is_sign_positive() {
                self.avg_entry_price = price;
            }
        }

        let closed = !old.is_zero()
            && (self.net_quantity.is_zero()
                || self.net_quantity.is_sign_positive() != old.is_sign_positive());
        let trade_pnl = if closed {
            let pnl = self.realized_pnl;
            self.realized_pnl = Decimal::ZERO;
            if !self.net_quantity.is_zero() {
                self.opened_at = at;
            }
            Some(pnl)
        } else {
            None
        };

        self.mark(price, at);
        FillEffect {
            realized_pnl: realized,
            closed,
            trade_pnl,
        }
    }
}

/// Exposure held back for an order that has been approved but not yet settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub symbol: String,
    pub side: SignalSide,
    pub notional: Decimal,
}

/// Portfolio-level state read by the risk manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Account capital used for sizing
    pub capital: Decimal,
    pub realized_pnl: Decimal,
    /// Highest equity since the drawdown reference point
    pub peak_equity: Decimal,
    pub drawdown_reference_at: DateTime<Utc>,
    pub positions: HashMap<String, Position>,
    /// Keyed by client order id
    pub reservations: HashMap<String, Reservation>,
    pub last_trade_at: HashMap<String, DateTime<Utc>>,
}

impl PortfolioState {
    pub fn new(capital: Decimal) -> Self {
        Self {
            capital,
            realized_pnl: Decimal::ZERO,
            peak_equity: capital,
            drawdown_reference_at: Utc::now(),
            positions: HashMap::new(),
            reservations: HashMap::new(),
            last_trade_at: HashMap::new(),
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn equity(&self) -> Decimal {
        self.capital + self.realized_pnl + self.unrealized_pnl()
    }

    /// Peak-to-current decline as a fraction of peak equity
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_equity - self.equity()) / self.peak_equity).max(Decimal::ZERO)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol).filter(|p| !p.is_flat())
    }

    /// Position exposure plus outstanding reservations for symbols matching `filter`
    pub fn exposure_where<F>(&self, filter: F) -> Decimal
    where
        F: Fn(&str) -> bool,
    {
        let held: Decimal = self
            .positions
            .values()
            .filter(|p| filter(&p.symbol))
            .map(|p| p.notional())
            .sum();
        let reserved: Decimal = self
            .reservations
            .values()
            .filter(|r| filter(&r.symbol))
            .map(|r| r.notional)
            .sum();
        held + reserved
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.exposure_where(|_| true)
    }

    pub fn reserve(&mut self, client_order_id: &str, reservation: Reservation) {
        self.reservations
            .insert(client_order_id.to_string(), reservation);
    }

    pub fn release(&mut self, client_order_id: &str) -> Option<Reservation> {
        self.reservations.remove(client_order_id)
    }

    pub fn mark(&mut self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.mark(price, at);
        }
        self.refresh_peak();
    }

    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> FillEffect {
        let effect = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol, at))
            .apply_fill(side, quantity, price, at);
        self.realized_pnl += effect.realized_pnl;
        self.last_trade_at.insert(symbol.to_string(), at);
        self.refresh_peak();
        effect
    }

    /// Start a new drawdown measurement window from current equity
    pub fn reset_drawdown_reference(&mut self, at: DateTime<Utc>) {
        self.peak_equity = self.equity();
        self.drawdown_reference_at = at;
    }

    /// Time-based reset; returns true if the reference was moved
    pub fn maybe_reset_drawdown(&mut self, reset_after: Duration, now: DateTime<Utc>) -> bool {
        if now - self.drawdown_reference_at >= reset_after {
            self.reset_drawdown_reference(now);
            return true;
        }
        false
    }

    fn refresh_peak(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_add_and_close_long() {
        let now = Utc::now();
        let mut pos = Position::new("BTC-USD", now);

        let e = pos.apply_fill(OrderSide::Buy, dec!(1), dec!(100), now);
        assert!(!e.closed);
        pos.apply_fill(OrderSide::Buy, dec!(1), dec!(110), now);
        assert_eq!(pos.avg_entry_price, dec!(105));
        assert_eq!(pos.direction(), SignalSide::Long);

        let e = pos.apply_fill(OrderSide::Sell, dec!(1), dec!(115), now);
        assert_eq!(e.realized_pnl, dec!(10));
        assert!(!e.closed);

        let e = pos.apply_fill(OrderSide::Sell, dec!(1), dec!(95), now);
        assert_eq!(e.realized_pnl, dec!(-10));
        assert!(e.closed);
        assert_eq!(e.trade_pnl, Some(dec!(0)));
        assert!(pos.is_flat());
    }

    #[test]
    fn test_flip_short_to_long() {
        let now = Utc::now();
        let mut pos = Position::new("ETH-USD", now);
        pos.apply_fill(OrderSide::Sell, dec!(2), dec!(50), now);

        let e = pos.apply_fill(OrderSide::Buy, dec!(3), dec!(40), now);
        // closes 2 short at +10 each, opens 1 long at 40
        assert_eq!(e.realized_pnl, dec!(20));
        assert!(e.closed);
        assert_eq!(e.trade_pnl, Some(dec!(20)));
        assert_eq!(pos.net_quantity, dec!(1));
        assert_eq!(pos.avg_entry_price, dec!(40));
    }

    #[test]
    fn test_drawdown_tracks_peak() {
        let now = Utc::now();
        let mut pf = PortfolioState::new(dec!(1000));
        pf.apply_fill("BTC-USD", OrderSide::Buy, dec!(10), dec!(10), now);
        pf.mark("BTC-USD", dec!(20), now); // equity 1100, new peak
        assert_eq!(pf.peak_equity, dec!(1100));

        pf.mark("BTC-USD", dec!(0), now); // equity 900
        // (1100 - 900) / 1100
        assert!(pf.drawdown() > dec!(0.18) && pf.drawdown() < dec!(0.19));

        pf.reset_drawdown_reference(now);
        assert_eq!(pf.drawdown(), dec!(0));
    }

    #[test]
    fn test_reservations_count_as_exposure() {
        let mut pf = PortfolioState::new(dec!(1000));
        pf.reserve(
            "q-1",
            Reservation {
                symbol: "SOL-USD".into(),
                side: SignalSide::Long,
                notional: dec!(50),
            },
        );
        assert_eq!(pf.gross_exposure(), dec!(50));
        assert_eq!(pf.exposure_where(|s| s == "BTC-USD"), dec!(0));
        assert!(pf.release("q-1").is_some());
        assert_eq!(pf.gross_exposure(), dec!(0));
    }
}
