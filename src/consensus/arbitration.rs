//! Tie-break arbitration
//!
//! Invoked only when the two leading sides are within the configured epsilon.
//! Synchronous arbiters are pure and deterministic; an optional async
//! `ArbitrationEvaluator` (remote model) can be consulted first and falls back
//! to the synchronous arbiter on error or timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{SideScores, SignalSide, WeightedSignal};
use crate::error::Result;

/// Everything an arbiter sees about a contested tick
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrationRequest {
    pub symbol: String,
    pub leader: SignalSide,
    pub runner_up: SignalSide,
    pub scores: SideScores,
    pub contributions: Vec<WeightedSignal>,
}

impl ArbitrationRequest {
    pub fn is_contender(&self, side: SignalSide) -> bool {
        side == self.leader || side == self.runner_up
    }
}

/// Arbiter's pick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterRuling {
    /// One of the two contenders, or FLAT
    pub side: SignalSide,
    /// Arbiter's own confidence, blended into the decision when configured
    pub confidence: Option<f64>,
    pub rationale: String,
}

impl ArbiterRuling {
    pub fn flat(rationale: impl Into<String>) -> Self {
        Self {
            side: SignalSide::Flat,
            confidence: None,
            rationale: rationale.into(),
        }
    }
}

/// Pure tie-breaker
pub trait Arbiter: Send + Sync {
    fn name(&self) -> &str;

    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbiterRuling;
}

/// Async tie-breaker with access to all competing signals (e.g. an LLM).
#[async_trait]
pub trait ArbitrationEvaluator: Send + Sync {
    fn id(&self) -> &str;

    async fn arbitrate(&self, request: &ArbitrationRequest) -> Result<ArbiterRuling>;
}

/// Which synchronous arbiter to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArbiterConfig {
    /// A single designated agent has the casting vote
    DesignatedAgent { agent_id: String },
    /// The contributing agent with the highest weight decides
    HighestAuthority,
    /// Contested ticks never trade
    AlwaysFlat,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ArbiterConfig::HighestAuthority
    }
}

impl ArbiterConfig {
    pub fn build(&self) -> Arc<dyn Arbiter> {
        match self {
            ArbiterConfig::DesignatedAgent { agent_id } => {
                Arc::new(DesignatedAgentArbiter::new(agent_id))
            }
            ArbiterConfig::HighestAuthority => Arc::new(HighestAuthorityArbiter),
            ArbiterConfig::AlwaysFlat => Arc::new(AlwaysFlatArbiter),
        }
    }
}

pub struct DesignatedAgentArbiter {
    agent_id: String,
}

impl DesignatedAgentArbiter {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
        }
    }
}

impl Arbiter for DesignatedAgentArbiter {
    fn name(&self) -> &str {
        "designated_agent"
    }

    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbiterRuling {
        let vote = request
            .contributions
            .iter()
            .find(|c| c.signal.agent_id == self.agent_id);

        match vote {
            Some(c) if request.is_contender(c.signal.side) => ArbiterRuling {
                side: c.signal.side,
                confidence: Some(c.signal.normalized_confidence()),
                rationale: format!("designated agent {} voted {}", self.agent_id, c.signal.side),
            },
            Some(c) => ArbiterRuling::flat(format!(
                "designated agent {} voted {}, not a contender",
                self.agent_id, c.signal.side
            )),
            None => ArbiterRuling::flat(format!(
                "designated agent {} did not vote",
                self.agent_id
            )),
        }
    }
}

/// Highest weight wins; ties go to higher confidence, then lowest agent id.
pub struct HighestAuthorityArbiter;

impl Arbiter for HighestAuthorityArbiter {
    fn name(&self) -> &str {
        "highest_authority"
    }

    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbiterRuling {
        let authority = request
            .contributions
            .iter()
            .filter(|c| request.is_contender(c.signal.side))
            .max_by(|a, b| {
                a.weight
                    .total_cmp(&b.weight)
                    .then(
                        a.signal
                            .normalized_confidence()
                            .total_cmp(&b.signal.normalized_confidence()),
                    )
                    .then(b.signal.agent_id.cmp(&a.signal.agent_id))
            });

        match authority {
            Some(c) => ArbiterRuling {
                side: c.signal.side,
                confidence: Some(c.signal.normalized_confidence()),
                rationale: format!(
                    "highest-authority agent {} (weight {:.3}) voted {}",
                    c.signal.agent_id, c.weight, c.signal.side
                ),
            },
            None => ArbiterRuling::flat("no contender signal to arbitrate"),
        }
    }
}

pub struct AlwaysFlatArbiter;

impl Arbiter for AlwaysFlatArbiter {
    fn name(&self) -> &str {
        "always_flat"
    }

    fn arbitrate(&self, _request: &ArbitrationRequest) -> ArbiterRuling {
        ArbiterRuling::flat("contested tick, arbiter stays flat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Signal;

    fn weighted(agent: &str, side: SignalSide, confidence: f64, weight: f64) -> WeightedSignal {
        WeightedSignal {
            signal: Signal::new(agent, "BTC-USD", side, confidence),
            weight,
            score: confidence * weight,
        }
    }

    fn request(contributions: Vec<WeightedSignal>) -> ArbitrationRequest {
        ArbitrationRequest {
            symbol: "BTC-USD".into(),
            leader: SignalSide::Long,
            runner_up: SignalSide::Short,
            scores: SideScores::default(),
            contributions,
        }
    }

    #[test]
    fn test_highest_authority_picks_heaviest_agent() {
        let req = request(vec![
            weighted("a", SignalSide::Long, 0.9, 1.0),
            weighted("b", SignalSide::Short, 0.5, 2.0),
            weighted("c", SignalSide::Flat, 1.0, 3.0),
        ]);
        let ruling = HighestAuthorityArbiter.arbitrate(&req);
        assert_eq!(ruling.side, SignalSide::Short);
        assert_eq!(ruling.confidence, Some(0.5));
    }

    #[test]
    fn test_highest_authority_tie_is_deterministic() {
        let req = request(vec![
            weighted("b", SignalSide::Short, 0.6, 1.0),
            weighted("a", SignalSide::Long, 0.6, 1.0),
        ]);
        assert_eq!(HighestAuthorityArbiter.arbitrate(&req).side, SignalSide::Long);
    }

    #[test]
    fn test_designated_agent() {
        let req = request(vec![
            weighted("lead", SignalSide::Short, 0.7, 1.0),
            weighted("x", SignalSide::Long, 0.9, 1.0),
        ]);
        let ruling = DesignatedAgentArbiter::new("lead").arbitrate(&req);
        assert_eq!(ruling.side, SignalSide::Short);

        let ruling = DesignatedAgentArbiter::new("absent").arbitrate(&req);
        assert_eq!(ruling.side, SignalSide::Flat);
    }

    #[test]
    fn test_arbiter_config_deserializes() {
        let cfg: ArbiterConfig =
            serde_json::from_str(r#"{"kind":"designated_agent","agent_id":"grok"}"#).unwrap();
        assert_eq!(
            cfg,
            ArbiterConfig::DesignatedAgent {
                agent_id: "grok".into()
            }
        );
        assert_eq!(cfg.build().name(), "designated_agent");
    }
}
