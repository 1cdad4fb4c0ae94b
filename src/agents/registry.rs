use std::sync::Arc;

use tracing::info;

use super::builtin::AgentSpec;
use super::traits::AgentEvaluator;
use crate::error::{QuorumError, Result};

/// Ordered set of evaluators with unique ids
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn AgentEvaluator>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configured built-in agents
    pub fn from_specs(specs: &[AgentSpec]) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec.build())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, agent: Arc<dyn AgentEvaluator>) -> Result<()> {
        if self.contains(agent.id()) {
            return Err(QuorumError::DuplicateAgent(agent.id().to_string()));
        }
        info!(agent = agent.id(), name = agent.name(), "Agent registered");
        self.agents.push(agent);
        Ok(())
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.id() == agent_id)
    }

    pub fn agents(&self) -> &[Arc<dyn AgentEvaluator>] {
        &self.agents
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::builtin::AgentKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_duplicate_ids_rejected() {
        let specs = vec![
            AgentSpec {
                id: "mom".into(),
                kind: AgentKind::Momentum {
                    lookback: 5,
                    threshold_bps: dec!(10),
                },
            },
            AgentSpec {
                id: "mom".into(),
                kind: AgentKind::MeanReversion {
                    threshold_bps: dec!(20),
                },
            },
        ];
        let err = AgentRegistry::from_specs(&specs).unwrap_err();
        assert!(matches!(err, QuorumError::DuplicateAgent(id) if id == "mom"));
    }

    #[test]
    fn test_registration_order_kept() {
        let specs = vec![
            AgentSpec {
                id: "b".into(),
                kind: AgentKind::VolatilityBreakout {
                    band_multiple: dec!(1),
                },
            },
            AgentSpec {
                id: "a".into(),
                kind: AgentKind::MeanReversion {
                    threshold_bps: dec!(20),
                },
            },
        ];
        let registry = AgentRegistry::from_specs(&specs).unwrap();
        assert_eq!(registry.ids(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(registry.len(), 2);
    }
}
