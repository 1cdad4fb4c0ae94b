use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{QuorumError, Result};

/// How the position-size cap is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// Flat `max_position_fraction` of capital
    FixedFraction,
    /// `kelly_multiplier * (2p - 1)` of capital with p = decision confidence,
    /// never above `max_position_fraction`
    Kelly,
}

/// Risk limits (all fractions are of account capital)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Decision confidence must exceed this
    pub min_confidence: f64,
    pub sizing: SizingMode,
    pub max_position_fraction: Decimal,
    pub kelly_multiplier: f64,
    /// Extra scaling for arbitrated decisions
    pub arbitration_size_multiplier: f64,
    /// Smallest order worth sending
    pub min_order_notional: Decimal,
    /// Stop distance in volatility units (ATR multiple)
    pub stop_atr_multiple: Decimal,
    pub max_loss_per_trade_fraction: Decimal,
    pub max_gross_exposure_fraction: Decimal,
    pub max_correlated_exposure_fraction: Decimal,
    /// Named groups of correlated symbols; a symbol outside every group
    /// is its own group
    pub correlation_groups: HashMap<String, Vec<String>>,
    /// Drawdown from peak equity that blocks risk-increasing decisions
    pub max_drawdown: Decimal,
    /// Move the drawdown reference to current equity after this long
    pub drawdown_reset_secs: Option<u64>,
    pub cooldown_secs: u64,
    pub cooldown_applies_to_exits: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            sizing: SizingMode::FixedFraction,
            max_position_fraction: dec!(0.10),
            kelly_multiplier: 0.25,
            arbitration_size_multiplier: 0.5,
            min_order_notional: dec!(10),
            stop_atr_multiple: dec!(2),
            max_loss_per_trade_fraction: dec!(0.01),
            max_gross_exposure_fraction: dec!(0.5),
            max_correlated_exposure_fraction: dec!(0.25),
            correlation_groups: HashMap::new(),
            max_drawdown: dec!(0.20),
            drawdown_reset_secs: None,
            cooldown_secs: 300,
            cooldown_applies_to_exits: false,
        }
    }
}

impl RiskLimits {
    /// Symbols sharing a correlation budget with `symbol`, itself included
    pub fn correlated_with(&self, symbol: &str) -> Vec<String> {
        let mut group: Vec<String> = self
            .correlation_groups
            .values()
            .filter(|members| members.iter().any(|m| m == symbol))
            .flatten()
            .cloned()
            .collect();
        if !group.iter().any(|m| m == symbol) {
            group.push(symbol.to_string());
        }
        group.sort();
        group.dedup();
        group
    }

    pub fn drawdown_reset(&self) -> Option<chrono::Duration> {
        self.drawdown_reset_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, value: Decimal| -> Result<()> {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(QuorumError::InvalidConfig(format!(
                    "risk.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
            Ok(())
        };
        fraction("max_position_fraction", self.max_position_fraction)?;
        fraction("max_loss_per_trade_fraction", self.max_loss_per_trade_fraction)?;
        fraction("max_gross_exposure_fraction", self.max_gross_exposure_fraction)?;
        fraction(
            "max_correlated_exposure_fraction",
            self.max_correlated_exposure_fraction,
        )?;
        fraction("max_drawdown", self.max_drawdown)?;

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(QuorumError::InvalidConfig(format!(
                "risk.min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.arbitration_size_multiplier) {
            return Err(QuorumError::InvalidConfig(format!(
                "risk.arbitration_size_multiplier must be within [0, 1], got {}",
                self.arbitration_size_multiplier
            )));
        }
        if !(self.kelly_multiplier > 0.0 && self.kelly_multiplier <= 1.0) {
            return Err(QuorumError::InvalidConfig(format!(
                "risk.kelly_multiplier must be within (0, 1], got {}",
                self.kelly_multiplier
            )));
        }
        if self.min_order_notional < Decimal::ZERO || self.stop_atr_multiple < Decimal::ZERO {
            return Err(QuorumError::InvalidConfig(
                "risk.min_order_notional and risk.stop_atr_multiple must not be negative".into(),
            ));
        }
        Ok(())
    }
}
