use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Current weight of one agent in consensus scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWeight {
    pub agent_id: String,
    /// Always within [0, W_max]
    pub weight: f64,
    /// Wins over the rolling window
    pub win_rate: f64,
    /// Closed trades in the rolling window
    pub trade_count: usize,
    pub avg_realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Immutable, versioned view of every agent's weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub version: u64,
    /// Weight of agents with no recorded history
    pub default_weight: f64,
    pub weights: HashMap<String, AgentWeight>,
}

impl WeightSnapshot {
    /// Every agent at `default_weight`
    pub fn uniform(default_weight: f64) -> Self {
        Self {
            version: 0,
            default_weight,
            weights: HashMap::new(),
        }
    }

    /// Explicit weights, mostly for tests and replays
    pub fn from_weights<'a, I>(default_weight: f64, weights: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let now = Utc::now();
        let weights = weights
            .into_iter()
            .map(|(agent, weight)| {
                (
                    agent.to_string(),
                    AgentWeight {
                        agent_id: agent.to_string(),
                        weight,
                        win_rate: 0.0,
                        trade_count: 0,
                        avg_realized_pnl: Decimal::ZERO,
                        updated_at: now,
                    },
                )
            })
            .collect();
        Self {
            version: 0,
            default_weight,
            weights,
        }
    }

    pub fn weight_of(&self, agent_id: &str) -> f64 {
        self.weights
            .get(agent_id)
            .map(|w| w.weight)
            .unwrap_or(self.default_weight)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentWeight> {
        self.weights.get(agent_id)
    }
}

/// Read side of the weight publication channel.
///
/// `snapshot()` never blocks on the writer: it clones the `Arc` of the last
/// published snapshot.
#[derive(Debug, Clone)]
pub struct WeightsHandle {
    rx: watch::Receiver<Arc<WeightSnapshot>>,
}

impl WeightsHandle {
    pub(crate) fn new(rx: watch::Receiver<Arc<WeightSnapshot>>) -> Self {
        Self { rx }
    }

    /// Handle over a fixed snapshot with no writer behind it
    pub fn fixed(snapshot: WeightSnapshot) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(snapshot));
        Self { rx }
    }

    pub fn snapshot(&self) -> Arc<WeightSnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Wait until a newer snapshot is published; false once the writer is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
