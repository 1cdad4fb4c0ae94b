use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::coordination::CircuitState;
use crate::domain::{ConsensusDecision, Order, OrderStatus, Signal, SignalSide};
use crate::risk::RiskVerdict;

/// What an operator should read from an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// No trade: agents did not agree
    NoConsensus,
    /// No trade: market data too old
    StaleData,
    /// No trade: risk vetoed
    RiskVeto,
    OrderFilled,
    /// Trade attempted, exchange refused it
    ExchangeRejected,
    /// Trade attempted, retries or time ran out
    OrderFailed,
    /// Healthy but paused by the circuit breaker
    CircuitPaused,
    CircuitResumed,
    Audit,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::NoConsensus => "no_consensus",
            EventCategory::StaleData => "stale_data",
            EventCategory::RiskVeto => "risk_veto",
            EventCategory::OrderFilled => "order_filled",
            EventCategory::ExchangeRejected => "exchange_rejected",
            EventCategory::OrderFailed => "order_failed",
            EventCategory::CircuitPaused => "circuit_paused",
            EventCategory::CircuitResumed => "circuit_resumed",
            EventCategory::Audit => "audit",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradingEvent {
    SignalsCollected {
        symbol: String,
        signals: Vec<Signal>,
        abstained: Vec<String>,
        timed_out: Vec<String>,
        failed: Vec<String>,
        at: DateTime<Utc>,
    },
    StaleSnapshot {
        symbol: String,
        age_ms: i64,
        at: DateTime<Utc>,
    },
    DecisionMade {
        decision: ConsensusDecision,
    },
    RiskEvaluated {
        verdict: RiskVerdict,
    },
    OrderTransitioned {
        client_order_id: String,
        symbol: String,
        from: OrderStatus,
        to: OrderStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    },
    OrderTerminal {
        order: Order,
    },
    CircuitStateChanged {
        from: CircuitState,
        to: CircuitState,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    TradeClosed {
        symbol: String,
        realized_pnl: Decimal,
        agents: Vec<String>,
        at: DateTime<Utc>,
    },
    WeightsUpdated {
        agent_id: String,
        weight: f64,
        version: u64,
        at: DateTime<Utc>,
    },
}

impl TradingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::SignalsCollected { .. } => "signals_collected",
            TradingEvent::StaleSnapshot { .. } => "stale_snapshot",
            TradingEvent::DecisionMade { .. } => "decision_made",
            TradingEvent::RiskEvaluated { .. } => "risk_evaluated",
            TradingEvent::OrderTransitioned { .. } => "order_transitioned",
            TradingEvent::OrderTerminal { .. } => "order_terminal",
            TradingEvent::CircuitStateChanged { .. } => "circuit_state_changed",
            TradingEvent::TradeClosed { .. } => "trade_closed",
            TradingEvent::WeightsUpdated { .. } => "weights_updated",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            TradingEvent::StaleSnapshot { .. } => EventCategory::StaleData,
            TradingEvent::DecisionMade { decision } if decision.side == SignalSide::Flat => {
                EventCategory::NoConsensus
            }
            TradingEvent::RiskEvaluated { verdict } if !verdict.approved => EventCategory::RiskVeto,
            TradingEvent::OrderTerminal { order } => match order.status {
                OrderStatus::Filled => EventCategory::OrderFilled,
                OrderStatus::Rejected => EventCategory::ExchangeRejected,
                OrderStatus::Failed => EventCategory::OrderFailed,
                _ => EventCategory::Audit,
            },
            TradingEvent::CircuitStateChanged { to, .. } => match to {
                CircuitState::Open => EventCategory::CircuitPaused,
                CircuitState::Closed => EventCategory::CircuitResumed,
                CircuitState::HalfOpen => EventCategory::Audit,
            },
            _ => EventCategory::Audit,
        }
    }

    /// Terminal orders, vetoes and breaker open/close go to the notifier
    pub fn is_notifiable(&self) -> bool {
        match self {
            TradingEvent::OrderTerminal { .. } => true,
            TradingEvent::RiskEvaluated { verdict } => !verdict.approved,
            TradingEvent::CircuitStateChanged { to, .. } => *to != CircuitState::HalfOpen,
            _ => false,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            TradingEvent::SignalsCollected { symbol, .. }
            | TradingEvent::StaleSnapshot { symbol, .. }
            | TradingEvent::OrderTransitioned { symbol, .. }
            | TradingEvent::TradeClosed { symbol, .. } => Some(symbol),
            TradingEvent::DecisionMade { decision } => Some(&decision.symbol),
            TradingEvent::RiskEvaluated { verdict } => Some(&verdict.symbol),
            TradingEvent::OrderTerminal { order } => Some(&order.symbol),
            TradingEvent::CircuitStateChanged { .. } | TradingEvent::WeightsUpdated { .. } => None,
        }
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        match self {
            TradingEvent::SignalsCollected {
                symbol,
                signals,
                abstained,
                timed_out,
                failed,
                ..
            } => format!(
                "{}: {} signals, {} abstained, {} timed out, {} failed",
                symbol,
                signals.len(),
                abstained.len(),
                timed_out.len(),
                failed.len()
            ),
            TradingEvent::StaleSnapshot { symbol, age_ms, .. } => {
                format!("{}: snapshot {}ms old, staying flat", symbol, age_ms)
            }
            TradingEvent::DecisionMade { decision } => match &decision.flat_reason {
                Some(reason) => format!("{}: FLAT ({})", decision.symbol, reason),
                None => format!(
                    "{}: {} confidence {:.3}{}",
                    decision.symbol,
                    decision.side,
                    decision.confidence,
                    if decision.arbitration { " (arbitrated)" } else { "" }
                ),
            },
            TradingEvent::RiskEvaluated { verdict } => match verdict.veto_reason {
                Some(reason) => format!("{}: risk veto {}", verdict.symbol, reason),
                None => format!(
                    "{}: approved {} {} (notional {})",
                    verdict.symbol,
                    verdict.side,
                    verdict.quantity,
                    verdict.adjusted_size.round_dp(2)
                ),
            },
            TradingEvent::OrderTransitioned {
                client_order_id,
                from,
                to,
                ..
            } => format!("{}: {} -> {}", client_order_id, from, to),
            TradingEvent::OrderTerminal { order } => format!(
                "{} {} {} {}/{} {}{}",
                order.symbol,
                order.side,
                order.client_order_id,
                order.filled_quantity,
                order.quantity,
                order.status,
                order
                    .last_error
                    .as_ref()
                    .map(|e| format!(": {}", e))
                    .unwrap_or_default()
            ),
            TradingEvent::CircuitStateChanged { from, to, reason, .. } => format!(
                "circuit breaker {} -> {}{}",
                from,
                to,
                reason.as_ref().map(|r| format!(" ({})", r)).unwrap_or_default()
            ),
            TradingEvent::TradeClosed {
                symbol,
                realized_pnl,
                agents,
                ..
            } => format!(
                "{}: trade closed, pnl {} credited to {}",
                symbol,
                realized_pnl.round_dp(2),
                agents.join(",")
            ),
            TradingEvent::WeightsUpdated {
                agent_id,
                weight,
                version,
                ..
            } => format!("weight {} = {:.3} (v{})", agent_id, weight, version),
        }
    }
}
