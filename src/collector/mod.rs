//! Signal collection
//!
//! Fans one market snapshot out to every registered agent and gathers the
//! signals that arrive before the tick deadline.

mod signal_collector;

pub use signal_collector::{AgentStats, CollectionReport, CollectorConfig, SignalCollector};
