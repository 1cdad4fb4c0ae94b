use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::agents::AgentRegistry;
use crate::domain::{MarketSnapshot, Signal};
use dashmap::DashMap;

/// Configuration for the signal collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Per-tick deadline for all agents (milliseconds)
    pub deadline_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { deadline_ms: 3000 }
    }
}

impl CollectorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Per-agent observability counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub signals: u64,
    pub abstentions: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub last_latency_ms: Option<u64>,
    pub total_latency_ms: u64,
}

impl AgentStats {
    /// Mean latency over answered calls (signal, abstention or error)
    pub fn avg_latency_ms(&self) -> Option<f64> {
        let answered = self.signals + self.abstentions + self.errors;
        if answered == 0 {
            None
        } else {
            Some(self.total_latency_ms as f64 / answered as f64)
        }
    }
}

/// Result of one collection round
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    /// At most one signal per agent, in registry order
    pub signals: Vec<Signal>,
    /// Agents that answered without a signal
    pub abstained: Vec<String>,
    /// Agents that errored, panicked or returned an invalid signal
    pub failed: Vec<String>,
    /// Agents still running at the deadline
    pub timed_out: Vec<String>,
    pub elapsed: Duration,
}

enum AgentOutcome {
    Signal(Signal),
    Abstained,
    Failed(String),
}

/// Invokes every registered agent concurrently under a hard deadline
pub struct SignalCollector {
    registry: AgentRegistry,
    stats: Arc<DashMap<String, AgentStats>>,
}

impl SignalCollector {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Collect signals; abstentions, failures and stragglers are dropped.
    pub async fn collect(&self, snapshot: Arc<MarketSnapshot>, deadline: Duration) -> Vec<Signal> {
        self.collect_with_report(snapshot, deadline).await.signals
    }

    /// Collect signals and report what happened to every agent.
    ///
    /// Returns by `deadline` (plus scheduling slack) no matter how agents
    /// behave: tasks still running at the deadline are aborted and their
    /// eventual results discarded.
    pub async fn collect_with_report(
        &self,
        snapshot: Arc<MarketSnapshot>,
        deadline: Duration,
    ) -> CollectionReport {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let mut tasks = JoinSet::new();

        for agent in self.registry.agents() {
            let agent = Arc::clone(agent);
            let snapshot = Arc::clone(&snapshot);
            tasks.spawn(async move {
                let call_started = Instant::now();
                let result = AssertUnwindSafe(agent.evaluate(&snapshot))
                    .catch_unwind()
                    .await;
                let outcome = match result {
                    Ok(Ok(Some(signal))) => validate(agent.id(), &snapshot, signal),
                    Ok(Ok(None)) => AgentOutcome::Abstained,
                    Ok(Err(e)) => AgentOutcome::Failed(e.to_string()),
                    Err(_) => AgentOutcome::Failed("evaluator panicked".to_string()),
                };
                (agent.id().to_string(), outcome, call_started.elapsed())
            });
        }

        let mut signals: HashMap<String, Signal> = HashMap::new();
        let mut report = CollectionReport::default();
        let mut answered: Vec<String> = Vec::with_capacity(self.registry.len());

        loop {
            match timeout_at(deadline_at, tasks.join_next()).await {
                Ok(Some(Ok((agent_id, outcome, latency)))) => {
                    let latency_ms = latency.as_millis() as u64;
                    let mut stats = self.stats.entry(agent_id.clone()).or_default();
                    stats.last_latency_ms = Some(latency_ms);
                    stats.total_latency_ms += latency_ms;

                    match outcome {
                        AgentOutcome::Signal(signal) => {
                            stats.signals += 1;
                            debug!(
                                agent = %agent_id,
                                symbol = %signal.symbol,
                                side = %signal.side,
                                confidence = signal.confidence,
                                latency_ms,
                                "Signal received"
                            );
                            signals.insert(agent_id.clone(), signal);
                        }
                        AgentOutcome::Abstained => {
                            stats.abstentions += 1;
                            debug!(agent = %agent_id, latency_ms, "Agent abstained");
                            report.abstained.push(agent_id.clone());
                        }
                        AgentOutcome::Failed(reason) => {
                            stats.errors += 1;
                            warn!(agent = %agent_id, %reason, "Agent failed, treated as abstention");
                            report.failed.push(agent_id.clone());
                        }
                    }
                    answered.push(agent_id);
                }
                Ok(Some(Err(e))) => {
                    // Only reachable if a task was aborted externally
                    warn!(error = %e, "Agent task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        for agent_id in self.registry.ids() {
            if !answered.contains(&agent_id) {
                self.stats.entry(agent_id.clone()).or_default().timeouts += 1;
                debug!(agent = %agent_id, deadline_ms = deadline.as_millis() as u64, "Agent missed deadline");
                report.timed_out.push(agent_id);
            }
        }

        report.signals = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| signals.remove(&id))
            .collect();
        report.elapsed = started.elapsed();
        report
    }

    /// Copy of the per-agent counters
    pub fn stats(&self) -> HashMap<String, AgentStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

fn validate(agent_id: &str, snapshot: &MarketSnapshot, signal: Signal) -> AgentOutcome {
    if signal.agent_id != agent_id {
        return AgentOutcome::Failed(format!(
            "signal attributed to '{}' instead of '{}'",
            signal.agent_id, agent_id
        ));
    }
    if signal.symbol != snapshot.symbol {
        return AgentOutcome::Failed(format!(
            "signal for {} on a {} tick",
            signal.symbol, snapshot.symbol
        ));
    }
    AgentOutcome::Signal(signal)
}
