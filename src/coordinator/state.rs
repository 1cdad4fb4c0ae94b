//! Tick outcomes

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{FlatReason, OrderStatus};
use crate::risk::VetoReason;

/// What one tick of one symbol ended with.
///
/// Distinguishes "no trade because no consensus" from "no trade because risk
/// vetoed" from "trade attempted but the exchange refused".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Consensus came out FLAT
    NoConsensus { reason: FlatReason },
    /// Snapshot too old to trade on
    Stale { age_ms: i64 },
    Vetoed { reason: VetoReason },
    /// Order reached a terminal state after reaching the exchange
    Executed {
        client_order_id: String,
        status: OrderStatus,
        filled: Decimal,
    },
    /// Order still open on the exchange; reconciled next tick
    Deferred { client_order_id: String },
    /// Circuit breaker refused the order
    Paused { client_order_id: String },
    /// Rejected by the exchange or failed after retries
    Failed {
        client_order_id: String,
        status: OrderStatus,
        error: Option<String>,
    },
}

impl TickOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TickOutcome::NoConsensus { .. } => "no_consensus",
            TickOutcome::Stale { .. } => "stale",
            TickOutcome::Vetoed { .. } => "vetoed",
            TickOutcome::Executed { .. } => "executed",
            TickOutcome::Deferred { .. } => "deferred",
            TickOutcome::Paused { .. } => "paused",
            TickOutcome::Failed { .. } => "failed",
        }
    }

    pub fn traded(&self) -> bool {
        matches!(
            self,
            TickOutcome::Executed { filled, .. } if *filled > Decimal::ZERO
        )
    }
}

impl std::fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickOutcome::NoConsensus { reason } => write!(f, "no consensus: {}", reason),
            TickOutcome::Stale { age_ms } => write!(f, "stale snapshot ({}ms)", age_ms),
            TickOutcome::Vetoed { reason } => write!(f, "vetoed: {}", reason),
            TickOutcome::Executed {
                client_order_id,
                status,
                filled,
            } => write!(f, "{} {} (filled {})", client_order_id, status, filled),
            TickOutcome::Deferred { client_order_id } => {
                write!(f, "{} deferred", client_order_id)
            }
            TickOutcome::Paused { client_order_id } => {
                write!(f, "{} refused, circuit open", client_order_id)
            }
            TickOutcome::Failed {
                client_order_id,
                status,
                error,
            } => write!(
                f,
                "{} {}: {}",
                client_order_id,
                status,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
