//! AgentEvaluator trait — one strategy or model behind a fixed capability
//!
//! The collector owns the scheduling: an evaluator only answers "given this
//! snapshot, what is your vote?" and never touches orders or positions.

use async_trait::async_trait;

use crate::domain::{MarketSnapshot, Signal};
use crate::error::Result;

/// Pluggable signal producer.
///
/// `Ok(None)` is an explicit abstention. Errors, panics and missing the tick
/// deadline are also treated as abstentions by the collector.
#[async_trait]
pub trait AgentEvaluator: Send + Sync + 'static {
    /// Unique identifier for this agent instance
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str {
        self.id()
    }

    /// Produce at most one signal for the snapshot's symbol.
    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>>;
}
