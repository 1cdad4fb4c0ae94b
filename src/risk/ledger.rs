use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::limits::RiskLimits;
use super::manager::{RiskManager, RiskVerdict};
use crate::domain::{
    ConsensusDecision, FillEffect, MarketSnapshot, OrderSide, PortfolioState, Reservation,
};

/// Live portfolio behind a single async mutex.
///
/// Every tick evaluates and reserves under the same lock, so two symbols in
/// the same correlation group can never both spend the same exposure room.
pub struct ExposureLedger {
    state: Mutex<PortfolioState>,
    limits: RiskLimits,
}

impl ExposureLedger {
    pub fn new(portfolio: PortfolioState, limits: RiskLimits) -> Self {
        Self {
            state: Mutex::new(portfolio),
            limits,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Copy of the current portfolio
    pub async fn snapshot(&self) -> PortfolioState {
        self.state.lock().await.clone()
    }

    /// Evaluate a decision and, when approved for new risk, reserve its
    /// notional under `client_order_id` before releasing the lock.
    pub async fn evaluate_and_reserve(
        &self,
        decision: &ConsensusDecision,
        market: &MarketSnapshot,
        client_order_id: &str,
    ) -> RiskVerdict {
        let mut state = self.state.lock().await;

        if let Some(reset_after) = self.limits.drawdown_reset() {
            if state.maybe_reset_drawdown(reset_after, decision.timestamp) {
                info!(
                    equity = %state.equity(),
                    "Drawdown reference reset after {}s",
                    reset_after.num_seconds()
                );
            }
        }

        let verdict = RiskManager::evaluate(decision, &state, market, &self.limits);
        if verdict.approved && !verdict.risk_reducing {
            state.reserve(
                client_order_id,
                Reservation {
                    symbol: verdict.symbol.clone(),
                    side: verdict.side,
                    notional: verdict.adjusted_size,
                },
            );
            debug!(
                symbol = %verdict.symbol,
                client_order_id,
                notional = %verdict.adjusted_size,
                "Exposure reserved"
            );
        }
        verdict
    }

    /// Drop the reservation of an order that reached a terminal state
    pub async fn release(&self, client_order_id: &str) -> Option<Reservation> {
        let released = self.state.lock().await.release(client_order_id);
        if released.is_some() {
            debug!(client_order_id, "Exposure reservation released");
        }
        released
    }

    pub async fn apply_fill(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> FillEffect {
        self.state
            .lock()
            .await
            .apply_fill(symbol, side, quantity, price, at)
    }

    pub async fn mark(&self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        self.state.lock().await.mark(symbol, price, at);
    }

    /// Manual drawdown reset by an operator
    pub async fn reset_drawdown(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.reset_drawdown_reference(at);
        info!(equity = %state.equity(), "Drawdown reference reset manually");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SideScores, SignalSide};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn decision(symbol: &str) -> ConsensusDecision {
        ConsensusDecision {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side: SignalSide::Long,
            confidence: 0.9,
            size_fraction: 0.2,
            contributions: vec![],
            scores: SideScores::default(),
            arbitration: false,
            flat_reason: None,
            weights_version: 0,
            timestamp: Utc::now(),
        }
    }

    fn market(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.into(),
            timestamp: Utc::now(),
            best_bid: dec!(99),
            best_ask: dec!(101),
            last_trades: vec![],
            volatility: Decimal::ZERO,
        }
    }

    fn limits() -> RiskLimits {
        let mut limits = RiskLimits {
            max_position_fraction: dec!(0.2),
            max_correlated_exposure_fraction: dec!(0.3),
            ..Default::default()
        };
        limits
            .correlation_groups
            .insert("majors".into(), vec!["BTC-USD".into(), "ETH-USD".into()]);
        limits
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_group_ceiling() {
        let ledger = Arc::new(ExposureLedger::new(
            PortfolioState::new(dec!(10000)),
            limits(),
        ));

        let (a, b) = tokio::join!(
            {
                let ledger = ledger.clone();
                async move {
                    ledger
                        .evaluate_and_reserve(&decision("BTC-USD"), &market("BTC-USD"), "a")
                        .await
                }
            },
            {
                let ledger = ledger.clone();
                async move {
                    ledger
                        .evaluate_and_reserve(&decision("ETH-USD"), &market("ETH-USD"), "b")
                        .await
                }
            }
        );

        assert!(a.approved && b.approved);
        // 2000 + 1000, never 2000 + 2000
        assert_eq!(a.adjusted_size + b.adjusted_size, dec!(3000));
        assert_eq!(ledger.snapshot().await.reservations.len(), 2);

        ledger.release("a").await;
        ledger.release("b").await;
        assert_eq!(ledger.snapshot().await.gross_exposure(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_vetoed_decision_reserves_nothing() {
        let ledger = ExposureLedger::new(PortfolioState::new(dec!(10000)), limits());
        let mut weak = decision("BTC-USD");
        weak.confidence = 0.1;
        let verdict = ledger
            .evaluate_and_reserve(&weak, &market("BTC-USD"), "c")
            .await;
        assert!(!verdict.approved);
        assert!(ledger.snapshot().await.reservations.is_empty());
        assert!(ledger.release("c").await.is_none());
    }

    #[tokio::test]
    async fn test_time_based_drawdown_reset() {
        let limits = RiskLimits {
            drawdown_reset_secs: Some(60),
            ..limits()
        };
        let mut portfolio = PortfolioState::new(dec!(10000));
        portfolio.realized_pnl = dec!(-2500);
        portfolio.drawdown_reference_at = Utc::now() - chrono::Duration::hours(1);
        let ledger = ExposureLedger::new(portfolio, limits);

        let verdict = ledger
            .evaluate_and_reserve(&decision("BTC-USD"), &market("BTC-USD"), "d")
            .await;
        assert!(verdict.approved, "{:?}", verdict.checks);
        assert_eq!(ledger.snapshot().await.drawdown(), Decimal::ZERO);
    }
}
