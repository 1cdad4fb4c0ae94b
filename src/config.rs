use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::agents::{AgentKind, AgentSpec};
use crate::collector::CollectorConfig;
use crate::consensus::{ArbiterConfig, ConsensusConfig};
use crate::coordination::CircuitBreakerConfig;
use crate::coordinator::EngineConfig;
use crate::error::{QuorumError, Result};
use crate::events::EventsConfig;
use crate::execution::ExecutionConfig;
use crate::market::MarketDataConfig;
use crate::performance::PerformanceConfig;
use crate::risk::RiskLimits;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub collector: CollectorConfig,
    pub consensus: ConsensusConfig,
    pub risk: RiskLimits,
    pub execution: ExecutionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub performance: PerformanceConfig,
    pub market_data: MarketDataConfig,
    pub agents: Vec<AgentSpec>,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            collector: CollectorConfig::default(),
            consensus: ConsensusConfig::default(),
            risk: RiskLimits::default(),
            execution: ExecutionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            performance: PerformanceConfig::default(),
            market_data: MarketDataConfig::default(),
            agents: default_agents(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rolling log file; console only when unset
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,quorum_trader=debug".to_string(),
            json: false,
            dir: None,
        }
    }
}

/// The three built-in evaluators with their usual parameters
pub fn default_agents() -> Vec<AgentSpec> {
    use rust_decimal_macros::dec;

    vec![
        AgentSpec {
            id: "momentum".to_string(),
            kind: AgentKind::Momentum {
                lookback: 10,
                threshold_bps: dec!(5),
            },
        },
        AgentSpec {
            id: "mean_reversion".to_string(),
            kind: AgentKind::MeanReversion {
                threshold_bps: dec!(8),
            },
        },
        AgentSpec {
            id: "breakout".to_string(),
            kind: AgentKind::VolatilityBreakout {
                band_multiple: dec!(0.5),
            },
        },
    ]
}

impl AppConfig {
    /// Load configuration from `config/`
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load `default.toml`, then `<QUORUM_ENV>.toml`, then `QUORUM_*` variables
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("QUORUM_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            // Override with environment variables (e.g., QUORUM_RISK__MAX_DRAWDOWN)
            .add_source(
                Environment::with_prefix("QUORUM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut check = |result: Result<()>| {
            if let Err(e) = result {
                errors.push(e.to_string());
            }
        };

        check(self.engine.validate());
        check(self.consensus.validate());
        check(self.risk.validate());
        check(self.execution.validate());
        check(self.circuit_breaker.validate());
        check(self.performance.validate());
        check(self.market_data.validate());

        if self.collector.deadline_ms == 0 {
            errors.push("collector.deadline_ms must be positive".to_string());
        }
        if self.events.capacity == 0 {
            errors.push("events.capacity must be positive".to_string());
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                errors.push(format!("agent id {} is configured twice", agent.id));
            }
        }
        if self.agents.len() < self.consensus.min_quorum {
            errors.push(format!(
                "{} agents can never reach a quorum of {}",
                self.agents.len(),
                self.consensus.min_quorum
            ));
        }
        if let ArbiterConfig::DesignatedAgent { agent_id } = &self.consensus.arbiter {
            if !ids.contains(agent_id.as_str()) {
                errors.push(format!("designated arbiter {} is not a configured agent", agent_id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuorumError::InvalidConfig(errors.join("; ")))
        }
    }
}
