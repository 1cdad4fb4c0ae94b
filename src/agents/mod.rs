//! Trading Agents — pluggable signal evaluators
//!
//! Each agent implements `AgentEvaluator` and is invoked once per tick by the
//! signal collector with the tick's `MarketSnapshot`.

pub mod builtin;
pub mod registry;
pub mod traits;

pub use builtin::{AgentKind, AgentSpec, MeanReversionAgent, MomentumAgent, VolatilityBreakoutAgent};
pub use registry::AgentRegistry;
pub use traits::AgentEvaluator;
