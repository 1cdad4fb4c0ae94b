//! Risk gating between consensus and execution
//!
//! `RiskManager::evaluate` is a pure check chain over an explicit portfolio
//! snapshot; `ExposureLedger` owns the live portfolio and makes the
//! read-evaluate-reserve sequence atomic across concurrent ticks.

mod ledger;
mod limits;
mod manager;

pub use ledger::ExposureLedger;
pub use limits::{RiskLimits, SizingMode};
pub use manager::{CheckOutcome, CheckRecord, RiskCheck, RiskManager, RiskVerdict, VetoReason};
