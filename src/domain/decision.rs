use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::{Signal, SignalSide};

/// A signal together with the weight it was scored with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedSignal {
    pub signal: Signal,
    /// Agent weight read from the performance snapshot
    pub weight: f64,
    /// clamp(confidence) * weight
    pub score: f64,
}

/// Aggregate score per side
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideScores {
    pub long: f64,
    pub short: f64,
    pub flat: f64,
}

impl SideScores {
    pub fn get(&self, side: SignalSide) -> f64 {
        match side {
            SignalSide::Long => self.long,
            SignalSide::Short => self.short,
            SignalSide::Flat => self.flat,
        }
    }

    pub fn add(&mut self, side: SignalSide, score: f64) {
        match side {
            SignalSide::Long => self.long += score,
            SignalSide::Short => self.short += score,
            SignalSide::Flat => self.flat += score,
        }
    }

    pub fn total(&self) -> f64 {
        self.long + self.short + self.flat
    }

    /// Sides ordered by score, highest first. Ties keep LONG, SHORT, FLAT order.
    pub fn ranked(&self) -> [(SignalSide, f64); 3] {
        let mut ranked = SignalSide::ALL.map(|side| (side, self.get(side)));
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Why a decision came out FLAT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlatReason {
    /// No agent produced a signal
    NoSignals,
    /// Fewer distinct agents than the configured quorum
    InsufficientQuorum { have: usize, need: usize },
    /// Every contributing signal had zero score
    ZeroScore,
    /// FLAT side carried the highest score
    FlatMajority,
    /// Arbitration declared FLAT
    ArbiterFlat,
    /// Market snapshot older than the configured maximum age
    StaleSnapshot { age_ms: i64 },
}

impl std::fmt::Display for FlatReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatReason::NoSignals => write!(f, "no signals"),
            FlatReason::InsufficientQuorum { have, need } => {
                write!(f, "insufficient quorum ({}/{})", have, need)
            }
            FlatReason::ZeroScore => write!(f, "zero aggregate score"),
            FlatReason::FlatMajority => write!(f, "flat majority"),
            FlatReason::ArbiterFlat => write!(f, "arbiter declared flat"),
            FlatReason::StaleSnapshot { age_ms } => write!(f, "stale snapshot ({}ms)", age_ms),
        }
    }
}

/// Fused decision for one symbol and one tick. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub id: Uuid,
    pub symbol: String,
    pub side: SignalSide,
    /// Share of the total score held by the resolved side, in [0, 1]
    pub confidence: f64,
    /// Score-weighted suggested size of the resolved side, fraction of capital
    pub size_fraction: f64,
    pub contributions: Vec<WeightedSignal>,
    pub scores: SideScores,
    /// True when the tie-break arbiter picked the side
    pub arbitration: bool,
    pub flat_reason: Option<FlatReason>,
    /// Version of the weight snapshot used for scoring
    pub weights_version: u64,
    pub timestamp: DateTime<Utc>,
}

/// Deterministic id for a decision built from these inputs
pub fn decision_id(
    symbol: &str,
    contributions: &[WeightedSignal],
    weights_version: u64,
    timestamp: DateTime<Utc>,
) -> Uuid {
    let mut name = format!("{}|{}|{}", symbol, weights_version, timestamp.timestamp_micros());
    for c in contributions {
        name.push_str(&format!(
            "|{}:{}:{}:{}",
            c.signal.agent_id,
            c.signal.side,
            c.signal.confidence.to_bits(),
            c.weight.to_bits()
        ));
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

impl ConsensusDecision {
    /// A FLAT decision with zero confidence
    pub fn flat(
        symbol: &str,
        reason: FlatReason,
        contributions: Vec<WeightedSignal>,
        weights_version: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut scores = SideScores::default();
        for c in &contributions {
            scores.add(c.signal.side, c.score);
        }
        Self {
            id: decision_id(symbol, &contributions, weights_version, timestamp),
            symbol: symbol.to_string(),
            side: SignalSide::Flat,
            confidence: 0.0,
            size_fraction: 0.0,
            contributions,
            scores,
            arbitration: false,
            flat_reason: Some(reason),
            weights_version,
            timestamp,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.side.is_directional() && self.confidence > 0.0
    }

    /// Agents whose signals agreed with the resolved side.
    ///
    /// Agreement is by side and confidence, not score, so an agent muted to
    /// zero weight is still credited and can earn its weight back.
    pub fn supporting_agents(&self) -> Vec<String> {
        self.contributions
            .iter()
            .filter(|c| c.signal.side == self.side && c.signal.normalized_confidence() > 0.0)
            .map(|c| c.signal.agent_id.clone())
            .collect()
    }
}
