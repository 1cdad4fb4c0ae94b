//! Consensus: fuse agent signals into one decision per tick

mod arbitration;
mod engine;

pub use arbitration::{
    AlwaysFlatArbiter, Arbiter, ArbiterConfig, ArbiterRuling, ArbitrationEvaluator,
    ArbitrationRequest, DesignatedAgentArbiter, HighestAuthorityArbiter,
};
pub use engine::{ConsensusConfig, ConsensusEngine, Tally, TallyVerdict};
