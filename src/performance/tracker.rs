use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::weights::{AgentWeight, WeightSnapshot, WeightsHandle};
use crate::error::{QuorumError, Result};
use crate::events::{EventDispatcher, TradingEvent};

/// Weight update policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Closed trades kept per agent (K)
    pub window: usize,
    /// Upper bound for any agent weight
    pub max_weight: f64,
    /// Weight of an agent without enough history
    pub base_weight: f64,
    /// Closed trades required before the weight moves off `base_weight`
    pub min_trades: usize,
    /// Average PnL (account currency) that saturates the PnL factor
    pub pnl_scale: f64,
    /// How strongly average PnL moves the weight, in [0, 1]
    pub pnl_sensitivity: f64,
    /// Buffer size of the closed-trade channel
    pub channel_capacity: usize,
}

impl PerformanceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_weight >= 0.0 && self.max_weight.is_finite()) {
            return Err(QuorumError::InvalidConfig(format!(
                "performance.max_weight must be a non-negative number, got {}",
                self.max_weight
            )));
        }
        if !(0.0..=self.max_weight).contains(&self.base_weight) {
            return Err(QuorumError::InvalidConfig(format!(
                "performance.base_weight must be in [0, max_weight], got {}",
                self.base_weight
            )));
        }
        if self.window == 0 || self.channel_capacity == 0 {
            return Err(QuorumError::InvalidConfig(
                "performance.window and channel_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window: 20,
            max_weight: 3.0,
            base_weight: 1.0,
            min_trades: 5,
            pnl_scale: 50.0,
            pnl_sensitivity: 0.5,
            channel_capacity: 256,
        }
    }
}

/// A position that an agent contributed to reached a realized state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub agent_id: String,
    pub symbol: String,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Single writer of agent weights.
///
/// Every update builds a new `WeightSnapshot` (copy-on-write) with a bumped
/// version and publishes it; readers holding an older `Arc` are unaffected.
pub struct PerformanceTracker {
    config: PerformanceConfig,
    history: HashMap<String, VecDeque<Decimal>>,
    current: Arc<WeightSnapshot>,
    publisher: watch::Sender<Arc<WeightSnapshot>>,
    events: EventDispatcher,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig) -> (Self, WeightsHandle) {
        let initial = Arc::new(WeightSnapshot::uniform(config.base_weight));
        let (publisher, rx) = watch::channel(Arc::clone(&initial));
        let tracker = Self {
            config,
            history: HashMap::new(),
            current: initial,
            publisher,
            events: EventDispatcher::disabled(),
        };
        (tracker, WeightsHandle::new(rx))
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn snapshot(&self) -> Arc<WeightSnapshot> {
        Arc::clone(&self.current)
    }

    /// Record a closed trade and publish the agent's new weight
    pub fn on_trade_closed(&mut self, agent_id: &str, realized_pnl: Decimal) -> AgentWeight {
        let window = self.config.window.max(1);
        let history = self.history.entry(agent_id.to_string()).or_default();
        history.push_back(realized_pnl);
        while history.len() > window {
            history.pop_front();
        }

        let updated = compute_weight(&self.config, agent_id, history, Utc::now());

        let mut next = (*self.current).clone();
        next.version += 1;
        next.weights.insert(agent_id.to_string(), updated.clone());
        self.current = Arc::new(next);
        self.publisher.send_replace(Arc::clone(&self.current));

        debug!(
            agent = agent_id,
            weight = updated.weight,
            win_rate = updated.win_rate,
            trades = updated.trade_count,
            version = self.current.version,
            "Agent weight updated"
        );
        self.events.emit(TradingEvent::WeightsUpdated {
            agent_id: agent_id.to_string(),
            weight: updated.weight,
            version: self.current.version,
            at: updated.updated_at,
        });
        updated
    }

    /// Run the tracker as the sole consumer of closed-trade outcomes
    pub fn spawn(mut self, mut outcomes: mpsc::Receiver<TradeOutcome>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Performance tracker started");
            while let Some(outcome) = outcomes.recv().await {
                self.on_trade_closed(&outcome.agent_id, outcome.realized_pnl);
            }
            info!("Performance tracker stopped (outcome channel closed)");
        })
    }
}

fn compute_weight(
    config: &PerformanceConfig,
    agent_id: &str,
    history: &VecDeque<Decimal>,
    now: DateTime<Utc>,
) -> AgentWeight {
    let trade_count = history.len();
    let wins = history.iter().filter(|pnl| **pnl > Decimal::ZERO).count();
    let win_rate = if trade_count == 0 {
        0.0
    } else {
        wins as f64 / trade_count as f64
    };
    let avg = if trade_count == 0 {
        Decimal::ZERO
    } else {
        history.iter().copied().sum::<Decimal>() / Decimal::from(trade_count)
    };

    let max_weight = config.max_weight.max(0.0);
    let raw = if trade_count < config.min_trades {
        config.base_weight
    } else {
        let edge = 2.0 * win_rate;
        let scaled_pnl = if config.pnl_scale > 0.0 {
            avg.to_f64().unwrap_or(0.0) / config.pnl_scale
        } else {
            0.0
        };
        let pnl_factor = 1.0 + config.pnl_sensitivity.clamp(0.0, 1.0) * scaled_pnl.tanh();
        config.base_weight * edge * pnl_factor
    };
    let weight = if raw.is_finite() {
        raw.clamp(0.0, max_weight)
    } else {
        0.0
    };

    AgentWeight {
        agent_id: agent_id.to_string(),
        weight,
        win_rate,
        trade_count,
        avg_realized_pnl: avg,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> PerformanceConfig {
        PerformanceConfig {
            window: 10,
            max_weight: 2.0,
            base_weight: 1.0,
            min_trades: 3,
            pnl_scale: 10.0,
            pnl_sensitivity: 0.5,
            channel_capacity: 8,
        }
    }

    #[test]
    fn test_base_weight_until_min_trades() {
        let (mut tracker, _) = PerformanceTracker::new(config());
        let w = tracker.on_trade_closed("a", dec!(100));
        assert_eq!(w.weight, 1.0);
        assert_eq!(w.trade_count, 1);
    }

    #[test]
    fn test_weight_bounds_hold_for_long_sequences() {
        let (mut tracker, _) = PerformanceTracker::new(config());
        for _ in 0..500 {
            let w = tracker.on_trade_closed("winner", dec!(1000000));
            assert!(w.weight >= 0.0 && w.weight <= 2.0);
        }
        assert_eq!(tracker.snapshot().weight_of("winner"), 2.0);

        for _ in 0..500 {
            let w = tracker.on_trade_closed("loser", dec!(-1000000));
            assert!(w.weight >= 0.0 && w.weight <= 2.0);
        }
        assert_eq!(tracker.snapshot().weight_of("loser"), 0.0);
    }

    #[test]
    fn test_window_is_rolling() {
        let (mut tracker, _) = PerformanceTracker::new(config());
        for _ in 0..10 {
            tracker.on_trade_closed("a", dec!(-5));
        }
        for _ in 0..10 {
            tracker.on_trade_closed("a", dec!(5));
        }
        let w = tracker.snapshot().get("a").cloned().unwrap();
        assert_eq!(w.trade_count, 10);
        assert_eq!(w.win_rate, 1.0);
    }

    #[test]
    fn test_muted_agent_recovers_on_wins() {
        let (mut tracker, _) = PerformanceTracker::new(config());
        for _ in 0..5 {
            tracker.on_trade_closed("a", dec!(-5));
        }
        assert_eq!(tracker.snapshot().weight_of("a"), 0.0);

        let w = tracker.on_trade_closed("a", dec!(5));
        assert!(w.weight > 0.0);
        for _ in 0..10 {
            tracker.on_trade_closed("a", dec!(5));
        }
        assert!(tracker.snapshot().weight_of("a") > 1.0);
    }

    #[test]
    fn test_snapshots_are_versioned_and_immutable() {
        let (mut tracker, handle) = PerformanceTracker::new(config());
        let before = handle.snapshot();
        tracker.on_trade_closed("a", dec!(1));
        tracker.on_trade_closed("b", dec!(1));

        let after = handle.snapshot();
        assert_eq!(before.version, 0);
        assert!(before.weights.is_empty());
        assert_eq!(after.version, 2);
        assert_eq!(after.weights.len(), 2);
    }

    #[tokio::test]
    async fn test_spawned_tracker_consumes_outcomes() {
        let (tracker, mut handle) = PerformanceTracker::new(config());
        let (tx, rx) = mpsc::channel(8);
        let task = tracker.spawn(rx);

        tx.send(TradeOutcome {
            agent_id: "a".into(),
            symbol: "BTC-USD".into(),
            realized_pnl: dec!(3),
            closed_at: Utc::now(),
        })
        .await
        .unwrap();

        assert!(handle.changed().await);
        assert_eq!(handle.version(), 1);

        drop(tx);
        task.await.unwrap();
    }
}
