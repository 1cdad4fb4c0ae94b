//! Coordinator: one decision tick at a time per symbol
//!
//! Ticks of the same symbol are serialized by a per-symbol mutex; different
//! symbols run concurrently and only meet inside the exposure ledger.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::state::TickOutcome;
use crate::collector::{CollectorConfig, SignalCollector};
use crate::consensus::{ArbitrationEvaluator, ConsensusEngine};
use crate::coordination::wait_for_shutdown;
use crate::domain::{ConsensusDecision, FlatReason, Order, OrderStatus};
use crate::error::{QuorumError, Result};
use crate::events::{EventDispatcher, TradingEvent};
use crate::execution::{ExecutionReport, OrderExecutor};
use crate::market::{ensure_fresh, MarketDataConfig, MarketDataSource};
use crate::performance::{TradeOutcome, WeightsHandle};
use crate::risk::ExposureLedger;

/// Collaborators of the tick pipeline
pub struct CoordinatorParts {
    pub collector: SignalCollector,
    pub consensus: ConsensusEngine,
    pub weights: WeightsHandle,
    pub ledger: Arc<ExposureLedger>,
    pub executor: Arc<OrderExecutor>,
    pub market: Arc<dyn MarketDataSource>,
    /// Closed trades for the performance tracker
    pub outcomes: mpsc::Sender<TradeOutcome>,
}

pub struct TradingCoordinator {
    config: EngineConfig,
    collect_deadline: Duration,
    max_snapshot_age: chrono::Duration,
    collector: SignalCollector,
    consensus: ConsensusEngine,
    arbitration: Option<Arc<dyn ArbitrationEvaluator>>,
    weights: WeightsHandle,
    ledger: Arc<ExposureLedger>,
    executor: Arc<OrderExecutor>,
    market: Arc<dyn MarketDataSource>,
    outcomes: mpsc::Sender<TradeOutcome>,
    events: EventDispatcher,
    symbol_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Agents owning the open position of each symbol
    attribution: DashMap<String, Vec<String>>,
    /// Supporters of opening orders not yet terminal, by client order id
    pending_supporters: DashMap<String, Vec<String>>,
}

impl TradingCoordinator {
    pub fn new(config: EngineConfig, parts: CoordinatorParts) -> Self {
        Self {
            config,
            collect_deadline: CollectorConfig::default().deadline(),
            max_snapshot_age: MarketDataConfig::default().max_age(),
            collector: parts.collector,
            consensus: parts.consensus,
            arbitration: None,
            weights: parts.weights,
            ledger: parts.ledger,
            executor: parts.executor,
            market: parts.market,
            outcomes: parts.outcomes,
            events: EventDispatcher::disabled(),
            symbol_locks: DashMap::new(),
            attribution: DashMap::new(),
            pending_supporters: DashMap::new(),
        }
    }

    pub fn with_collector_config(mut self, config: &CollectorConfig) -> Self {
        self.collect_deadline = config.deadline();
        self
    }

    pub fn with_market_data_config(mut self, config: &MarketDataConfig) -> Self {
        self.max_snapshot_age = config.max_age();
        self
    }

    /// Consult `evaluator` on contested ticks
    pub fn with_arbitration_evaluator(mut self, evaluator: Arc<dyn ArbitrationEvaluator>) -> Self {
        self.arbitration = Some(evaluator);
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ExposureLedger> {
        &self.ledger
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    /// Agents currently credited with the open position in `symbol`
    pub fn attributed_agents(&self, symbol: &str) -> Vec<String> {
        self.attribution
            .get(symbol)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Reconcile orders left open by a previous run. Call before the first tick.
    pub async fn recover(&self) -> Result<usize> {
        let reports = self.executor.reconcile_open_orders().await?;
        let count = reports.len();
        for report in &reports {
            self.settle(report).await;
        }
        Ok(count)
    }

    /// Run one tick for `symbol`
    pub async fn run_tick(&self, symbol: &str) -> Result<TickOutcome> {
        let lock = self
            .symbol_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Orders deferred by the previous tick come first
        for report in self.executor.reconcile_symbol(symbol).await? {
            self.settle(&report).await;
        }
        if let Some(open) = self.executor.open_orders(symbol).first() {
            debug!(symbol, client_order_id = %open.client_order_id, "Previous order still open");
            return Ok(TickOutcome::Deferred {
                client_order_id: open.client_order_id.clone(),
            });
        }

        let snapshot = self.market.snapshot(symbol).await?;
        let now = Utc::now();
        let weights = self.weights.snapshot();

        if let Err(e) = ensure_fresh(&snapshot, self.max_snapshot_age, now) {
            let age_ms = snapshot.age(now).num_milliseconds();
            info!(symbol, age_ms, "Skipping tick: {}", e);
            self.events.emit(TradingEvent::StaleSnapshot {
                symbol: symbol.to_string(),
                age_ms,
                at: now,
            });
            let decision = ConsensusDecision::flat(
                symbol,
                FlatReason::StaleSnapshot { age_ms },
                Vec::new(),
                weights.version,
                now,
            );
            self.events.emit(TradingEvent::DecisionMade { decision });
            return Ok(TickOutcome::Stale { age_ms });
        }
        if snapshot.is_priceable() {
            self.ledger.mark(symbol, snapshot.mid(), now).await;
        }

        let snapshot = Arc::new(snapshot);
        let collected = self
            .collector
            .collect_with_report(Arc::clone(&snapshot), self.collect_deadline)
            .await;
        debug!(
            symbol,
            signals = collected.signals.len(),
            abstained = collected.abstained.len(),
            timed_out = collected.timed_out.len(),
            failed = collected.failed.len(),
            elapsed_ms = collected.elapsed.as_millis() as u64,
            "Signals collected"
        );
        self.events.emit(TradingEvent::SignalsCollected {
            symbol: symbol.to_string(),
            signals: collected.signals.clone(),
            abstained: collected.abstained.clone(),
            timed_out: collected.timed_out.clone(),
            failed: collected.failed.clone(),
            at: now,
        });

        let decision = match &self.arbitration {
            Some(evaluator) => {
                self.consensus
                    .resolve_with_evaluator(
                        symbol,
                        &collected.signals,
                        &weights,
                        now,
                        evaluator.as_ref(),
                    )
                    .await
            }
            None => self
                .consensus
                .resolve(symbol, &collected.signals, &weights, now),
        };
        self.events.emit(TradingEvent::DecisionMade {
            decision: decision.clone(),
        });

        if !decision.is_actionable() {
            return Ok(TickOutcome::NoConsensus {
                reason: decision.flat_reason.clone().unwrap_or(FlatReason::ZeroScore),
            });
        }

        let client_order_id = self.executor.next_client_order_id();
        let verdict = self
            .ledger
            .evaluate_and_reserve(&decision, &snapshot, &client_order_id)
            .await;
        self.events.emit(TradingEvent::RiskEvaluated {
            verdict: verdict.clone(),
        });

        if !verdict.approved {
            let reason = verdict
                .veto_reason
                .ok_or_else(|| QuorumError::Internal("veto without a reason".into()))?;
            info!(
                symbol,
                side = %decision.side,
                confidence = decision.confidence,
                reason = %reason,
                "Decision vetoed by risk"
            );
            return Ok(TickOutcome::Vetoed { reason });
        }

        let side = verdict
            .order_side()
            .ok_or_else(|| QuorumError::Internal("approved verdict without a side".into()))?;
        let order = Order::market(client_order_id.clone(), symbol, side, verdict.quantity)
            .with_decision(decision.id);
        if !verdict.risk_reducing {
            self.pending_supporters
                .insert(client_order_id.clone(), decision.supporting_agents());
        }

        info!(
            symbol,
            side = %side,
            quantity = %verdict.quantity,
            notional = %verdict.adjusted_size,
            confidence = decision.confidence,
            arbitration = decision.arbitration,
            risk_reducing = verdict.risk_reducing,
            "Executing decision"
        );
        let report = match self.executor.submit(order).await {
            Ok(report) => report,
            Err(e) => {
                // Never reached the exchange
                self.pending_supporters.remove(&client_order_id);
                self.ledger.release(&client_order_id).await;
                return Err(e);
            }
        };
        self.settle(&report).await;
        Ok(outcome_of(&report))
    }

    /// Credit closed trades to the agents that opened them and track who owns
    /// the position that remains.
    async fn settle(&self, report: &ExecutionReport) {
        let order = &report.order;
        let symbol = order.symbol.as_str();

        for fill in report.closed_trades() {
            let Some((_, agents)) = self.attribution.remove(symbol) else {
                debug!(symbol, "Position closed without attributed agents");
                continue;
            };
            let pnl = fill.effect.trade_pnl.unwrap_or(fill.effect.realized_pnl);
            info!(symbol, realized_pnl = %pnl, agents = ?agents, "Trade closed");
            for agent in &agents {
                let outcome = TradeOutcome {
                    agent_id: agent.clone(),
                    symbol: symbol.to_string(),
                    realized_pnl: pnl,
                    closed_at: fill.at,
                };
                if let Err(e) = self.outcomes.try_send(outcome) {
                    warn!(symbol, agent = %agent, "Trade outcome dropped: {}", e);
                }
            }
            self.events.emit(TradingEvent::TradeClosed {
                symbol: symbol.to_string(),
                realized_pnl: pnl,
                agents,
                at: fill.at,
            });
        }

        let supporters = if order.is_terminal() {
            self.pending_supporters
                .remove(&order.client_order_id)
                .map(|(_, s)| s)
        } else {
            self.pending_supporters
                .get(&order.client_order_id)
                .map(|s| s.clone())
        };
        if report.fills.is_empty() {
            return;
        }
        let Some(supporters) = supporters else {
            return;
        };
        let has_position = self.ledger.snapshot().await.position(symbol).is_some();
        if has_position {
            let mut owners = self.attribution.entry(symbol.to_string()).or_default();
            for agent in supporters {
                if !owners.contains(&agent) {
                    owners.push(agent);
                }
            }
        }
    }

    /// Drive one tick loop per configured symbol until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            symbols = ?self.config.symbols,
            interval_ms = self.config.tick_interval_ms,
            max_ticks = ?self.config.max_ticks,
            "Coordinator starting"
        );

        let mut loops = JoinSet::new();
        for symbol in self.config.symbols.clone() {
            let coordinator = Arc::clone(&self);
            let shutdown = shutdown.clone();
            loops.spawn(async move { coordinator.symbol_loop(symbol, shutdown).await });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Symbol loop crashed: {}", e);
            }
        }
        info!("Coordinator stopped");
        Ok(())
    }

    async fn symbol_loop(&self, symbol: String, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        // Don't burst-fire missed ticks
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(symbol = %symbol, ticks, "Tick loop stopping");
                    return;
                }
            }

            match self.run_tick(&symbol).await {
                Ok(outcome) => match &outcome {
                    TickOutcome::Executed { .. } => info!(symbol = %symbol, "Tick: {}", outcome),
                    TickOutcome::Failed { .. } | TickOutcome::Paused { .. } => {
                        warn!(symbol = %symbol, "Tick: {}", outcome)
                    }
                    _ => debug!(symbol = %symbol, "Tick: {}", outcome),
                },
                Err(e) => warn!(symbol = %symbol, "Tick failed: {}", e),
            }

            ticks += 1;
            if self.config.max_ticks.is_some_and(|max| ticks >= max) {
                info!(symbol = %symbol, ticks, "Tick budget exhausted");
                return;
            }
        }
    }
}

fn outcome_of(report: &ExecutionReport) -> TickOutcome {
    let order = &report.order;
    let client_order_id = order.client_order_id.clone();
    if report.circuit_open {
        return TickOutcome::Paused { client_order_id };
    }
    if report.deferred {
        return TickOutcome::Deferred { client_order_id };
    }
    match order.status {
        OrderStatus::Rejected | OrderStatus::Failed => TickOutcome::Failed {
            client_order_id,
            status: order.status,
            error: order.last_error.clone(),
        },
        status => TickOutcome::Executed {
            client_order_id,
            status,
            filled: order.filled_quantity,
        },
    }
}
