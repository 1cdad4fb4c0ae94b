//! Trading coordinator
//!
//! Runs the per-symbol tick pipeline: market snapshot, signal collection,
//! consensus, risk gating and order execution, then feeds closed trades back
//! to the performance tracker.

pub mod config;
pub mod coordinator;
pub mod state;

pub use config::EngineConfig;
pub use coordinator::{CoordinatorParts, TradingCoordinator};
pub use state::TickOutcome;
