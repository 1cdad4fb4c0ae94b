//! Built-in evaluators used for paper trading and smoke tests.
//!
//! Simple price-action rules. Real deployments register their
//! own `AgentEvaluator` implementations.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::traits::AgentEvaluator;
use crate::domain::{MarketSnapshot, Signal, SignalSide};
use crate::error::Result;

const BPS: Decimal = dec!(10000);

/// Base position size suggested by the built-ins at full confidence
const BASE_SIZE_FRACTION: f64 = 0.05;

/// Which built-in rule an agent runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentKind {
    /// Follow the drift of the last `lookback` trades
    Momentum { lookback: usize, threshold_bps: Decimal },
    /// Fade deviations of the last price from trade VWAP
    MeanReversion { threshold_bps: Decimal },
    /// Trade breaks of mid ± band_multiple × volatility
    VolatilityBreakout { band_multiple: Decimal },
}

/// Configured agent instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: AgentKind,
}

impl AgentSpec {
    pub fn build(&self) -> Arc<dyn AgentEvaluator> {
        match &self.kind {
            AgentKind::Momentum {
                lookback,
                threshold_bps,
            } => Arc::new(MomentumAgent::new(&self.id, *lookback, *threshold_bps)),
            AgentKind::MeanReversion { threshold_bps } => {
                Arc::new(MeanReversionAgent::new(&self.id, *threshold_bps))
            }
            AgentKind::VolatilityBreakout { band_multiple } => {
                Arc::new(VolatilityBreakoutAgent::new(&self.id, *band_multiple))
            }
        }
    }
}

/// Map a move of `magnitude` over `threshold` to a confidence in [0.5, 1]
fn confidence_from_excess(magnitude: Decimal, threshold: Decimal) -> f64 {
    if threshold <= Decimal::ZERO {
        return 1.0;
    }
    let ratio = (magnitude / threshold).to_f64().unwrap_or(0.0);
    (0.5 + (ratio - 1.0) / 4.0).clamp(0.5, 1.0)
}

fn directional(
    agent_id: &str,
    snapshot: &MarketSnapshot,
    side: SignalSide,
    confidence: f64,
    rationale: String,
) -> Signal {
    Signal::new(agent_id, &snapshot.symbol, side, confidence)
        .with_size_fraction(BASE_SIZE_FRACTION * confidence)
        .with_rationale(rationale)
        .with_timestamp(snapshot.timestamp)
}

pub struct MomentumAgent {
    id: String,
    lookback: usize,
    threshold_bps: Decimal,
}

impl MomentumAgent {
    pub fn new(id: &str, lookback: usize, threshold_bps: Decimal) -> Self {
        Self {
            id: id.to_string(),
            lookback: lookback.max(2),
            threshold_bps,
        }
    }
}

#[async_trait]
impl AgentEvaluator for MomentumAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        let trades = &snapshot.last_trades;
        if trades.len() < 2 {
            return Ok(None);
        }
        let window = &trades[trades.len().saturating_sub(self.lookback)..];
        let first = window[0].price;
        let last = window[window.len() - 1].price;
        if first <= Decimal::ZERO {
            return Ok(None);
        }

        let drift_bps = (last - first) / first * BPS;
        if drift_bps.abs() < self.threshold_bps {
            return Ok(Some(
                Signal::new(&self.id, &snapshot.symbol, SignalSide::Flat, 0.5)
                    .with_rationale(format!("drift {:.1}bps inside threshold", drift_bps))
                    .with_timestamp(snapshot.timestamp),
            ));
        }

        let side = if drift_bps > Decimal::ZERO {
            SignalSide::Long
        } else {
            SignalSide::Short
        };
        let confidence = confidence_from_excess(drift_bps.abs(), self.threshold_bps);
        Ok(Some(directional(
            &self.id,
            snapshot,
            side,
            confidence,
            format!("drift {:.1}bps over {} trades", drift_bps, window.len()),
        )))
    }
}

pub struct MeanReversionAgent {
    id: String,
    threshold_bps: Decimal,
}

impl MeanReversionAgent {
    pub fn new(id: &str, threshold_bps: Decimal) -> Self {
        Self {
            id: id.to_string(),
            threshold_bps,
        }
    }
}

#[async_trait]
impl AgentEvaluator for MeanReversionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        let Some(vwap) = snapshot.vwap() else {
            return Ok(None);
        };
        if vwap <= Decimal::ZERO {
            return Ok(None);
        }

        let deviation_bps = (snapshot.last_price() - vwap) / vwap * BPS;
        if deviation_bps.abs() < self.threshold_bps {
            return Ok(None);
        }

        // Fade the move
        let side = if deviation_bps > Decimal::ZERO {
            SignalSide::Short
        } else {
            SignalSide::Long
        };
        let confidence = confidence_from_excess(deviation_bps.abs(), self.threshold_bps);
        Ok(Some(directional(
            &self.id,
            snapshot,
            side,
            confidence,
            format!("last {:.1}bps from vwap {}", deviation_bps, vwap.round_dp(4)),
        )))
    }
}

pub struct VolatilityBreakoutAgent {
    id: String,
    band_multiple: Decimal,
}

impl VolatilityBreakoutAgent {
    pub fn new(id: &str, band_multiple: Decimal) -> Self {
        Self {
            id: id.to_string(),
            band_multiple,
        }
    }
}

#[async_trait]
impl AgentEvaluator for VolatilityBreakoutAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        let band = snapshot.volatility * self.band_multiple;
        if band <= Decimal::ZERO || snapshot.last_trades.is_empty() {
            return Ok(None);
        }

        let distance = snapshot.last_price() - snapshot.mid();
        if distance.abs() <= band {
            return Ok(None);
        }

        let side = if distance > Decimal::ZERO {
            SignalSide::Long
        } else {
            SignalSide::Short
        };
        let confidence = confidence_from_excess(distance.abs(), band);
        Ok(Some(directional(
            &self.id,
            snapshot,
            side,
            confidence,
            format!("break of {} band by {}", band.round_dp(4), distance.round_dp(4)),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trade;
    use chrono::Utc;

    fn snapshot(prices: &[Decimal]) -> MarketSnapshot {
        let now = Utc::now();
        MarketSnapshot {
            symbol: "BTC-USD".into(),
            timestamp: now,
            best_bid: dec!(99.9),
            best_ask: dec!(100.1),
            last_trades: prices
                .iter()
                .map(|p| Trade {
                    price: *p,
                    size: dec!(1),
                    timestamp: now,
                })
                .collect(),
            volatility: dec!(0.5),
        }
    }

    #[tokio::test]
    async fn test_momentum_follows_drift() {
        let agent = MomentumAgent::new("mom", 5, dec!(10));
        let snap = snapshot(&[dec!(100), dec!(100.2), dec!(100.5)]);
        let signal = agent.evaluate(&snap).await.unwrap().unwrap();
        assert_eq!(signal.side, SignalSide::Long);
        assert!(signal.confidence >= 0.5 && signal.confidence <= 1.0);
        assert_eq!(signal.agent_id, "mom");
    }

    #[tokio::test]
    async fn test_momentum_abstains_without_tape() {
        let agent = MomentumAgent::new("mom", 5, dec!(10));
        assert!(agent.evaluate(&snapshot(&[dec!(100)])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mean_reversion_fades() {
        let agent = MeanReversionAgent::new("mr", dec!(20));
        let snap = snapshot(&[dec!(100), dec!(100), dec!(101)]);
        let signal = agent.evaluate(&snap).await.unwrap().unwrap();
        assert_eq!(signal.side, SignalSide::Short);
    }

    #[tokio::test]
    async fn test_breakout_needs_band_break() {
        let agent = VolatilityBreakoutAgent::new("vb", dec!(2));
        // band = 1.0, last - mid = 0.5
        assert!(agent
            .evaluate(&snapshot(&[dec!(100.5)]))
            .await
            .unwrap()
            .is_none());
        let signal = agent
            .evaluate(&snapshot(&[dec!(98.5)]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.side, SignalSide::Short);
    }
}
