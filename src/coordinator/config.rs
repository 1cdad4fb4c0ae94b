//! Engine configuration

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QuorumError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbols traded, one tick loop each
    pub symbols: Vec<String>,
    /// Time between ticks of one symbol (ms)
    pub tick_interval_ms: u64,
    /// Starting account capital
    pub capital: Decimal,
    /// Trade against the in-process paper exchange
    pub dry_run: bool,
    /// Stop each symbol loop after this many ticks
    pub max_ticks: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            tick_interval_ms: 5_000,
            capital: dec!(10000),
            dry_run: true,
            max_ticks: None,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(QuorumError::InvalidConfig(
                "engine.symbols must list at least one symbol".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(QuorumError::InvalidConfig(format!(
                "engine.symbols lists {} twice",
                dup
            )));
        }
        if self.capital <= Decimal::ZERO {
            return Err(QuorumError::InvalidConfig(
                "engine.capital must be positive".into(),
            ));
        }
        Ok(())
    }
}
