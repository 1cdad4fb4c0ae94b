use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::arbitration::{Arbiter, ArbiterConfig, ArbiterRuling, ArbitrationEvaluator, ArbitrationRequest};
use crate::domain::{
    decision_id, ConsensusDecision, FlatReason, SideScores, Signal, SignalSide, WeightedSignal,
};
use crate::domain::signal::clamp_unit;
use crate::error::{QuorumError, Result};
use crate::performance::WeightSnapshot;

/// Consensus thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum number of agents with a directional signal
    pub min_quorum: usize,
    /// Relative score gap under which the two leading sides are contested
    pub tie_epsilon: f64,
    pub arbiter: ArbiterConfig,
    /// Share of the decision confidence taken from the arbiter's own confidence
    pub arbiter_confidence_weight: f64,
    /// Budget for an async arbitration evaluator before falling back
    pub arbiter_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_quorum: 2,
            tie_epsilon: 0.05,
            arbiter: ArbiterConfig::default(),
            arbiter_confidence_weight: 0.0,
            arbiter_timeout_ms: 1500,
        }
    }
}

impl ConsensusConfig {
    pub fn arbiter_timeout(&self) -> Duration {
        Duration::from_millis(self.arbiter_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_quorum == 0 {
            return Err(QuorumError::InvalidConfig(
                "consensus.min_quorum must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tie_epsilon) {
            return Err(QuorumError::InvalidConfig(format!(
                "consensus.tie_epsilon must be in [0, 1], got {}",
                self.tie_epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.arbiter_confidence_weight) {
            return Err(QuorumError::InvalidConfig(format!(
                "consensus.arbiter_confidence_weight must be in [0, 1], got {}",
                self.arbiter_confidence_weight
            )));
        }
        Ok(())
    }
}

/// Outcome of scoring, before arbitration
#[derive(Debug, Clone, PartialEq)]
pub enum TallyVerdict {
    Flat(FlatReason),
    Winner(SignalSide),
    Contested {
        leader: SignalSide,
        runner_up: SignalSide,
    },
}

/// Scored signals for one symbol and one tick
#[derive(Debug, Clone)]
pub struct Tally {
    pub symbol: String,
    /// One entry per agent, ordered by agent id
    pub contributions: Vec<WeightedSignal>,
    pub scores: SideScores,
    /// Agents with a LONG or SHORT signal
    pub directional_agents: usize,
    pub weights_version: u64,
    pub timestamp: DateTime<Utc>,
    pub verdict: TallyVerdict,
}

impl Tally {
    /// Request for the arbiter, present only for contested tallies
    pub fn arbitration_request(&self) -> Option<ArbitrationRequest> {
        match self.verdict {
            TallyVerdict::Contested { leader, runner_up } => Some(ArbitrationRequest {
                symbol: self.symbol.clone(),
                leader,
                runner_up,
                scores: self.scores,
                contributions: self.contributions.clone(),
            }),
            _ => None,
        }
    }
}

/// Confidence-weighted voting with a tie-break arbiter.
///
/// `tally`, `decide` and `resolve` hold no state between calls: the same
/// signals and weight snapshot always produce the same decision.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    arbiter: Arc<dyn Arbiter>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        let arbiter = config.arbiter.build();
        Self { config, arbiter }
    }

    pub fn with_arbiter(config: ConsensusConfig, arbiter: Arc<dyn Arbiter>) -> Self {
        Self { config, arbiter }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &Arc<dyn Arbiter> {
        &self.arbiter
    }

    /// Fuse signals into one decision using the synchronous arbiter.
    pub fn resolve(
        &self,
        symbol: &str,
        signals: &[Signal],
        weights: &WeightSnapshot,
        at: DateTime<Utc>,
    ) -> ConsensusDecision {
        let tally = self.tally(symbol, signals, weights, at);
        let ruling = tally
            .arbitration_request()
            .map(|request| self.arbiter.arbitrate(&request));
        self.decide(tally, ruling)
    }

    /// Like `resolve`, but contested ticks consult `evaluator` first. Errors
    /// and timeouts fall back to the synchronous arbiter.
    pub async fn resolve_with_evaluator(
        &self,
        symbol: &str,
        signals: &[Signal],
        weights: &WeightSnapshot,
        at: DateTime<Utc>,
        evaluator: &dyn ArbitrationEvaluator,
    ) -> ConsensusDecision {
        let tally = self.tally(symbol, signals, weights, at);
        let ruling = match tally.arbitration_request() {
            Some(request) => Some(self.arbitrate_remote(&request, evaluator).await),
            None => None,
        };
        self.decide(tally, ruling)
    }

    async fn arbitrate_remote(
        &self,
        request: &ArbitrationRequest,
        evaluator: &dyn ArbitrationEvaluator,
    ) -> ArbiterRuling {
        match tokio::time::timeout(self.config.arbiter_timeout(), evaluator.arbitrate(request)).await
        {
            Ok(Ok(ruling)) => ruling,
            Ok(Err(e)) => {
                warn!(
                    symbol = %request.symbol,
                    arbiter = evaluator.id(),
                    error = %e,
                    "Arbitration evaluator failed, using {}", self.arbiter.name()
                );
                self.arbiter.arbitrate(request)
            }
            Err(_) => {
                warn!(
                    symbol = %request.symbol,
                    arbiter = evaluator.id(),
                    timeout_ms = self.config.arbiter_timeout_ms,
                    "Arbitration evaluator timed out, using {}", self.arbiter.name()
                );
                self.arbiter.arbitrate(request)
            }
        }
    }

    /// Score signals and classify the tick.
    pub fn tally(
        &self,
        symbol: &str,
        signals: &[Signal],
        weights: &WeightSnapshot,
        at: DateTime<Utc>,
    ) -> Tally {
        // one signal per agent, the most recent one wins
        let mut latest: BTreeMap<&str, &Signal> = BTreeMap::new();
        for signal in signals.iter().filter(|s| s.symbol == symbol) {
            match latest.get(signal.agent_id.as_str()) {
                Some(existing) if !supersedes(signal, existing) => {}
                _ => {
                    latest.insert(signal.agent_id.as_str(), signal);
                }
            }
        }

        let mut scores = SideScores::default();
        let contributions: Vec<WeightedSignal> = latest
            .into_values()
            .map(|signal| {
                let weight = sanitize_weight(weights.weight_of(&signal.agent_id));
                let score = signal.normalized_confidence() * weight;
                scores.add(signal.side, score);
                WeightedSignal {
                    signal: signal.clone(),
                    weight,
                    score,
                }
            })
            .collect();

        let directional_agents = contributions
            .iter()
            .filter(|c| c.signal.side.is_directional())
            .count();

        let verdict = self.classify(&contributions, &scores, directional_agents);

        Tally {
            symbol: symbol.to_string(),
            contributions,
            scores,
            directional_agents,
            weights_version: weights.version,
            timestamp: at,
            verdict,
        }
    }

    fn classify(
        &self,
        contributions: &[WeightedSignal],
        scores: &SideScores,
        directional_agents: usize,
    ) -> TallyVerdict {
        if contributions.is_empty() {
            return TallyVerdict::Flat(FlatReason::NoSignals);
        }
        if directional_agents < self.config.min_quorum {
            return TallyVerdict::Flat(FlatReason::InsufficientQuorum {
                have: directional_agents,
                need: self.config.min_quorum,
            });
        }
        if scores.total() <= 0.0 {
            return TallyVerdict::Flat(FlatReason::ZeroScore);
        }

        let [(leader, top), (runner_up, second), _] = scores.ranked();
        if top - second < self.config.tie_epsilon * top {
            return TallyVerdict::Contested { leader, runner_up };
        }
        if leader == SignalSide::Flat {
            return TallyVerdict::Flat(FlatReason::FlatMajority);
        }
        TallyVerdict::Winner(leader)
    }

    /// Turn a tally (and the arbiter's ruling for contested ticks) into a decision.
    pub fn decide(&self, tally: Tally, ruling: Option<ArbiterRuling>) -> ConsensusDecision {
        match tally.verdict.clone() {
            TallyVerdict::Flat(reason) => {
                info!(
                    symbol = %tally.symbol,
                    agents = tally.contributions.len(),
                    directional = tally.directional_agents,
                    reason = %reason,
                    "No consensus, staying flat"
                );
                ConsensusDecision::flat(
                    &tally.symbol,
                    reason,
                    tally.contributions,
                    tally.weights_version,
                    tally.timestamp,
                )
            }
            TallyVerdict::Winner(side) => {
                let confidence = share_of(&tally.scores, side);
                debug!(
                    symbol = %tally.symbol,
                    side = %side,
                    confidence,
                    long = tally.scores.long,
                    short = tally.scores.short,
                    flat = tally.scores.flat,
                    "Consensus reached"
                );
                build(tally, side, confidence, false)
            }
            TallyVerdict::Contested { leader, runner_up } => {
                let ruling = ruling
                    .unwrap_or_else(|| ArbiterRuling::flat("no ruling supplied for contested tick"));
                let side = if ruling.side == leader || ruling.side == runner_up {
                    ruling.side
                } else {
                    SignalSide::Flat
                };

                info!(
                    symbol = %tally.symbol,
                    leader = %leader,
                    runner_up = %runner_up,
                    ruling = %side,
                    rationale = %ruling.rationale,
                    "Contested tick arbitrated"
                );

                if side == SignalSide::Flat {
                    let mut decision = ConsensusDecision::flat(
                        &tally.symbol,
                        FlatReason::ArbiterFlat,
                        tally.contributions,
                        tally.weights_version,
                        tally.timestamp,
                    );
                    decision.arbitration = true;
                    return decision;
                }

                let base = share_of(&tally.scores, side);
                let blend = clamp_unit(self.config.arbiter_confidence_weight);
                let confidence = match ruling.confidence {
                    Some(c) if blend > 0.0 => (1.0 - blend) * base + blend * clamp_unit(c),
                    _ => base,
                };
                build(tally, side, clamp_unit(confidence), true)
            }
        }
    }
}

fn build(tally: Tally, side: SignalSide, confidence: f64, arbitration: bool) -> ConsensusDecision {
    let side_score = tally.scores.get(side);
    let size_fraction = if side_score > 0.0 {
        tally
            .contributions
            .iter()
            .filter(|c| c.signal.side == side)
            .map(|c| c.score * c.signal.normalized_size_fraction())
            .sum::<f64>()
            / side_score
    } else {
        0.0
    };

    ConsensusDecision {
        id: decision_id(
            &tally.symbol,
            &tally.contributions,
            tally.weights_version,
            tally.timestamp,
        ),
        symbol: tally.symbol,
        side,
        confidence,
        size_fraction: clamp_unit(size_fraction),
        contributions: tally.contributions,
        scores: tally.scores,
        arbitration,
        flat_reason: None,
        weights_version: tally.weights_version,
        timestamp: tally.timestamp,
    }
}

fn share_of(scores: &SideScores, side: SignalSide) -> f64 {
    let total = scores.total();
    if total <= 0.0 {
        return 0.0;
    }
    clamp_unit(scores.get(side) / total)
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Later timestamp wins; equal timestamps are broken by content so the
/// outcome does not depend on input order.
fn supersedes(candidate: &Signal, existing: &Signal) -> bool {
    candidate
        .timestamp
        .cmp(&existing.timestamp)
        .then_with(|| {
            candidate
                .normalized_confidence()
                .total_cmp(&existing.normalized_confidence())
        })
        .then_with(|| candidate.side.as_str().cmp(existing.side.as_str()))
        .is_gt()
}
