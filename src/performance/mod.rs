//! Agent performance tracking
//!
//! Closed-trade outcomes flow in one direction (coordinator -> tracker);
//! versioned weight snapshots flow out (tracker -> consensus).

mod tracker;
mod weights;

pub use tracker::{PerformanceConfig, PerformanceTracker, TradeOutcome};
pub use weights::{AgentWeight, WeightSnapshot, WeightsHandle};
