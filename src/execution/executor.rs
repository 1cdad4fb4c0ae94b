//! Order execution state machine
//!
//! Owns every order from `PENDING` to a terminal state: submission with
//! retry under the circuit breaker and an overall timeout, fill polling,
//! cancellation and restart reconciliation. Confirmed fills are applied to
//! the exposure ledger here and nowhere else.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::ids::ClientOrderIdGenerator;
use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::store::OrderStore;
use crate::coordination::{Admission, CircuitBreaker};
use crate::domain::{FillEffect, Order, OrderStatus};
use crate::error::{ExchangeError, OrderError, QuorumError, Result};
use crate::events::{EventDispatcher, TradingEvent};
use crate::exchange::{ExchangeClient, OrderReport};
use crate::risk::ExposureLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub retry: RetryPolicy,
    /// Budget for the whole submit-and-retry loop
    pub submission_timeout_ms: u64,
    /// How long to poll for fills after the exchange accepted an order
    pub fill_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub client_id_prefix: String,
    /// JSON order journal; in-memory when unset
    pub order_store_path: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            submission_timeout_ms: 10_000,
            fill_wait_ms: 5_000,
            poll_interval_ms: 250,
            client_id_prefix: "qt".to_string(),
            order_store_path: None,
        }
    }
}

impl ExecutionConfig {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    pub fn fill_wait(&self) -> Duration {
        Duration::from_millis(self.fill_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.submission_timeout_ms == 0 {
            return Err(QuorumError::InvalidConfig(
                "execution.submission_timeout_ms must be positive".into(),
            ));
        }
        if self.client_id_prefix.trim().is_empty() {
            return Err(QuorumError::InvalidConfig(
                "execution.client_id_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// One confirmed fill applied to the portfolio
#[derive(Debug, Clone)]
pub struct AppliedFill {
    pub quantity: Decimal,
    pub price: Decimal,
    pub effect: FillEffect,
    pub at: DateTime<Utc>,
}

/// Where an order stands once the executor hands control back
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order: Order,
    pub fills: Vec<AppliedFill>,
    /// Still open on the exchange after the fill wait
    pub deferred: bool,
    /// Refused by the circuit breaker, never (or no longer) sent
    pub circuit_open: bool,
}

impl ExecutionReport {
    fn new(order: Order, fills: Vec<AppliedFill>, circuit_open: bool) -> Self {
        Self {
            deferred: !order.is_terminal(),
            order,
            fills,
            circuit_open,
        }
    }

    /// Fills that brought a position back to flat
    pub fn closed_trades(&self) -> impl Iterator<Item = &AppliedFill> {
        self.fills.iter().filter(|f| f.effect.closed)
    }
}

enum SubmitOutcome {
    Accepted(OrderReport),
    Rejected(String),
    Exhausted { attempts: u32, error: String },
    CircuitOpen(String),
}

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    breaker: Arc<CircuitBreaker>,
    ledger: Arc<ExposureLedger>,
    store: Arc<dyn OrderStore>,
    events: EventDispatcher,
    config: ExecutionConfig,
    orders: DashMap<String, Order>,
    ids: ClientOrderIdGenerator,
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<ExposureLedger>,
        store: Arc<dyn OrderStore>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            ids: ClientOrderIdGenerator::new(&config.client_id_prefix),
            exchange,
            breaker,
            ledger,
            store,
            events: EventDispatcher::disabled(),
            config,
            orders: DashMap::new(),
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn next_client_order_id(&self) -> String {
        self.ids.next_id()
    }

    pub fn order(&self, client_order_id: &str) -> Option<Order> {
        self.orders.get(client_order_id).map(|o| o.clone())
    }

    /// Non-terminal orders tracked for `symbol`
    pub fn open_orders(&self, symbol: &str) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && !o.is_terminal())
            .map(|o| o.clone())
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open
    }

    /// Drive a `PENDING` order until it is terminal or deferred.
    ///
    /// Errors are reserved for caller mistakes (duplicate id, empty size) and
    /// invariant violations; exchange failures end up on the returned order.
    pub async fn submit(&self, mut order: Order) -> Result<ExecutionReport> {
        if order.quantity <= Decimal::ZERO {
            return Err(OrderError::NonPositiveSize.into());
        }
        self.register(&order).await?;

        info!(
            client_order_id = %order.client_order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            exchange = self.exchange.name(),
            dry_run = self.exchange.is_dry_run(),
            "Submitting order"
        );

        let admission = match self.breaker.try_acquire().await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    symbol = %order.symbol,
                    "Order refused: {}", e
                );
                order.last_error = Some(e.to_string());
                self.transition(&mut order, OrderStatus::Failed, Some(e.to_string()))?;
                self.finalize(&order).await;
                return Ok(ExecutionReport::new(order, Vec::new(), true));
            }
        };

        self.transition(&mut order, OrderStatus::Submitted, None)?;
        self.persist(&order).await;

        let started = Instant::now();
        let mut retry = self.config.retry.start();
        let mut in_flight = None;
        let outcome = tokio::time::timeout(
            self.config.submission_timeout(),
            self.place_with_retry(&mut order, admission, &mut retry, &mut in_flight),
        )
        .await;

        let mut fills = Vec::new();
        let mut circuit_open = false;
        match outcome {
            Ok(SubmitOutcome::Accepted(report)) => {
                self.apply_report(&mut order, report, &mut fills).await?;
                if !order.is_terminal() {
                    self.await_fills(&mut order, &mut fills).await?;
                }
            }
            Ok(SubmitOutcome::Rejected(reason)) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    symbol = %order.symbol,
                    "Order rejected by exchange: {}", reason
                );
                order.last_error = Some(reason.clone());
                self.transition(&mut order, OrderStatus::Rejected, Some(reason))?;
            }
            Ok(SubmitOutcome::Exhausted { attempts, error }) => {
                let note = format!("{}: {}", OrderError::MaxRetriesExceeded { attempts }, error);
                warn!(client_order_id = %order.client_order_id, "Retries exhausted: {}", note);
                order.last_error = Some(error);
                self.resolve_unconfirmed(&mut order, note, &mut fills).await?;
            }
            Ok(SubmitOutcome::CircuitOpen(reason)) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    "Circuit opened during retries: {}", reason
                );
                order.last_error = Some(reason.clone());
                self.resolve_unconfirmed(&mut order, reason, &mut fills).await?;
                circuit_open = order.status == OrderStatus::Failed;
            }
            Err(_) => {
                if let Some(admission) = in_flight.take() {
                    self.breaker
                        .record_failure(admission, "submission timeout")
                        .await;
                }
                let elapsed = OrderError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                warn!(
                    client_order_id = %order.client_order_id,
                    attempts = retry.attempts(),
                    "Submission timed out: {}", elapsed
                );
                order.last_error = Some(elapsed.to_string());
                self.resolve_unconfirmed(&mut order, elapsed.to_string(), &mut fills)
                    .await?;
            }
        }

        self.persist(&order).await;
        self.finalize(&order).await;
        Ok(ExecutionReport::new(order, fills, circuit_open))
    }

    /// Cancel a tracked order. Orders already terminal are returned untouched.
    pub async fn cancel(&self, client_order_id: &str) -> Result<ExecutionReport> {
        let mut order = self.tracked(client_order_id).await?;
        let mut fills = Vec::new();

        if order.is_terminal() {
            debug!(client_order_id, status = %order.status, "Cancel ignored, order already terminal");
            return Ok(ExecutionReport::new(order, fills, false));
        }

        if order.status == OrderStatus::Pending {
            self.transition(&mut order, OrderStatus::Cancelled, Some("cancelled before submission".into()))?;
        } else {
            let report = self
                .exchange
                .cancel_order(client_order_id)
                .await
                .map_err(QuorumError::from)?;
            self.apply_report(&mut order, report, &mut fills).await?;
        }

        self.persist(&order).await;
        self.finalize(&order).await;
        Ok(ExecutionReport::new(order, fills, false))
    }

    /// Query the exchange for every order left open by a previous run.
    ///
    /// Must complete before the first tick. Orders still `PENDING` were never
    /// sent and fail; in-flight orders take the exchange's true state.
    pub async fn reconcile_open_orders(&self) -> Result<Vec<ExecutionReport>> {
        let open = self.store.load_open().await?;
        if open.is_empty() {
            return Ok(Vec::new());
        }
        info!(orders = open.len(), "Reconciling orders left open by previous run");

        let mut reports = Vec::with_capacity(open.len());
        for mut order in open {
            self.orders
                .insert(order.client_order_id.clone(), order.clone());
            if order.status == OrderStatus::Pending {
                self.transition(
                    &mut order,
                    OrderStatus::Failed,
                    Some("never submitted before restart".into()),
                )?;
                self.persist(&order).await;
                self.finalize(&order).await;
                reports.push(ExecutionReport::new(order, Vec::new(), false));
                continue;
            }
            reports.push(self.reconcile_order(order).await?);
        }
        Ok(reports)
    }

    /// Refresh the open orders of `symbol`, typically at the start of its tick
    pub async fn reconcile_symbol(&self, symbol: &str) -> Result<Vec<ExecutionReport>> {
        let mut reports = Vec::new();
        for order in self.open_orders(symbol) {
            reports.push(self.reconcile_order(order).await?);
        }
        Ok(reports)
    }

    async fn reconcile_order(&self, mut order: Order) -> Result<ExecutionReport> {
        let mut fills = Vec::new();
        match self.exchange.query_status(&order.client_order_id).await {
            Ok(report) => self.apply_report(&mut order, report, &mut fills).await?,
            Err(ExchangeError::UnknownOrder(_)) if order.status == OrderStatus::Submitted => {
                warn!(
                    client_order_id = %order.client_order_id,
                    "Submitted order unknown to exchange, marking failed"
                );
                self.transition(
                    &mut order,
                    OrderStatus::Failed,
                    Some("unknown to exchange on reconciliation".into()),
                )?;
            }
            Err(e) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    status = %order.status,
                    "Reconciliation query failed, order stays open: {}", e
                );
            }
        }
        self.persist(&order).await;
        self.finalize(&order).await;
        Ok(ExecutionReport::new(order, fills, false))
    }

    async fn register(&self, order: &Order) -> Result<()> {
        let id = order.client_order_id.clone();
        let known = self.orders.contains_key(&id)
            || self.store.get(&id).await.ok().flatten().is_some();
        if known {
            return Err(QuorumError::DuplicateClientOrderId(id));
        }
        if order.status != OrderStatus::Pending {
            return Err(QuorumError::InvalidStateTransition {
                client_order_id: id,
                from: order.status.to_string(),
                to: OrderStatus::Submitted.to_string(),
            });
        }
        match self.orders.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(QuorumError::DuplicateClientOrderId(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.clone());
            }
        }
        if let Err(e) = self.store.save(order).await {
            warn!(client_order_id = %order.client_order_id, "Order persistence failed: {}", e);
        }
        Ok(())
    }

    async fn tracked(&self, client_order_id: &str) -> Result<Order> {
        if let Some(order) = self.order(client_order_id) {
            return Ok(order);
        }
        self.store
            .get(client_order_id)
            .await?
            .ok_or_else(|| {
                OrderError::NotFound {
                    client_order_id: client_order_id.to_string(),
                }
                .into()
            })
    }

    async fn place_with_retry(
        &self,
        order: &mut Order,
        first: Admission,
        retry: &mut RetryState,
        in_flight: &mut Option<Admission>,
    ) -> SubmitOutcome {
        let mut next_admission = Some(first);
        loop {
            let admission = match next_admission.take() {
                Some(admission) => admission,
                None => match self.breaker.try_acquire().await {
                    Ok(admission) => admission,
                    Err(e) => return SubmitOutcome::CircuitOpen(e.to_string()),
                },
            };

            let attempt = retry.begin_attempt();
            *in_flight = Some(admission);
            let result = self.exchange.place_order(order).await;
            *in_flight = None;

            let err = match result {
                Ok(report) => {
                    self.breaker.record_success(admission).await;
                    debug!(
                        client_order_id = %order.client_order_id,
                        attempt,
                        status = %report.status,
                        "Exchange accepted order"
                    );
                    return SubmitOutcome::Accepted(report);
                }
                Err(err) => err,
            };

            // Permanent errors mean the exchange answered
            if err.is_transient() {
                self.breaker.record_failure(admission, &err.to_string()).await;
            } else {
                self.breaker.record_success(admission).await;
            }

            match retry.on_failure(&err) {
                RetryDecision::Retry { backoff } => {
                    order.retry_count += 1;
                    order.last_error = Some(err.to_string());
                    warn!(
                        client_order_id = %order.client_order_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient exchange error, retrying: {}", err
                    );
                    tokio::time::sleep(backoff).await;
                }
                RetryDecision::GiveUp { attempts } => {
                    return SubmitOutcome::Exhausted {
                        attempts,
                        error: err.to_string(),
                    }
                }
                RetryDecision::Reject { reason } => return SubmitOutcome::Rejected(reason),
            }
        }
    }

    /// Settle a `SUBMITTED` order whose placement got no definite answer.
    ///
    /// The exchange may have booked it anyway, so its view wins: a known
    /// order is adopted, an unknown one is cancelled best-effort and failed,
    /// and an unreachable exchange leaves the order open for reconciliation.
    async fn resolve_unconfirmed(
        &self,
        order: &mut Order,
        note: String,
        fills: &mut Vec<AppliedFill>,
    ) -> Result<()> {
        let id = order.client_order_id.clone();
        let query =
            tokio::time::timeout(self.config.submission_timeout(), self.exchange.query_status(&id))
                .await;

        match query {
            Ok(Ok(report)) => {
                info!(
                    client_order_id = %id,
                    status = %report.status,
                    filled = %report.filled_quantity,
                    "Exchange holds unconfirmed order, adopting its state"
                );
                self.apply_report(order, report, fills).await?;
                if !order.is_terminal() {
                    self.await_fills(order, fills).await?;
                }
            }
            Ok(Err(ExchangeError::UnknownOrder(_))) => {
                match self.exchange.cancel_order(&id).await {
                    // Booked between the query and the cancel
                    Ok(report) if report.filled_quantity > Decimal::ZERO => {
                        self.apply_report(order, report, fills).await?;
                        if !order.is_terminal() {
                            self.transition(order, OrderStatus::Cancelled, Some(note))?;
                        }
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => debug!(client_order_id = %id, "Best-effort cancel: {}", e),
                }
                warn!(client_order_id = %id, "Order unknown to exchange, failing: {}", note);
                self.transition(order, OrderStatus::Failed, Some(note))?;
            }
            Ok(Err(e)) => {
                warn!(
                    client_order_id = %id,
                    "Cannot confirm order state, leaving open for reconciliation: {}", e
                );
            }
            Err(_) => {
                warn!(
                    client_order_id = %id,
                    "Status query timed out, leaving order open for reconciliation"
                );
            }
        }
        Ok(())
    }

    async fn await_fills(&self, order: &mut Order, fills: &mut Vec<AppliedFill>) -> Result<()> {
        let deadline = Instant::now() + self.config.fill_wait();
        while !order.is_terminal() && Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval()).await;
            match self.exchange.query_status(&order.client_order_id).await {
                Ok(report) => self.apply_report(order, report, fills).await?,
                Err(e) if e.is_transient() => {
                    debug!(client_order_id = %order.client_order_id, "Status poll failed: {}", e);
                }
                Err(e) => {
                    warn!(
                        client_order_id = %order.client_order_id,
                        "Status poll aborted: {}", e
                    );
                    break;
                }
            }
        }
        if !order.is_terminal() {
            info!(
                client_order_id = %order.client_order_id,
                status = %order.status,
                filled = %order.filled_quantity,
                "Order still open after fill wait, deferring"
            );
        }
        Ok(())
    }

    /// Fold an exchange report into the order: new fills first, then status.
    async fn apply_report(
        &self,
        order: &mut Order,
        report: OrderReport,
        fills: &mut Vec<AppliedFill>,
    ) -> Result<()> {
        if order.is_terminal() {
            if report.status != order.status {
                // Out of a terminal state this errors loudly
                return self.transition(order, report.status, report.reason);
            }
            return Ok(());
        }
        if order.exchange_order_id.is_none() {
            order.exchange_order_id = report.exchange_order_id.clone();
        }

        let prev_qty = order.filled_quantity;
        let prev_avg = order.avg_fill_price;
        let delta = order.record_fill(report.filled_quantity, report.avg_fill_price);
        if delta > Decimal::ZERO {
            match fill_price(prev_qty, prev_avg, order, delta) {
                Some(price) => {
                    let at = Utc::now();
                    let effect = self
                        .ledger
                        .apply_fill(&order.symbol, order.side, delta, price, at)
                        .await;
                    info!(
                        client_order_id = %order.client_order_id,
                        symbol = %order.symbol,
                        side = %order.side,
                        quantity = %delta,
                        price = %price,
                        "Fill applied"
                    );
                    fills.push(AppliedFill {
                        quantity: delta,
                        price,
                        effect,
                        at,
                    });
                }
                None => error!(
                    client_order_id = %order.client_order_id,
                    quantity = %delta,
                    "Fill reported without a price, portfolio not updated"
                ),
            }
        }

        let target = report.status;
        let refill = target == OrderStatus::PartiallyFilled && delta > Decimal::ZERO;
        if target == order.status && !refill {
            return Ok(());
        }
        if order.status.can_transition_to(target) {
            return self.transition(order, target, report.reason);
        }
        debug!(
            client_order_id = %order.client_order_id,
            status = %order.status,
            reported = %target,
            "Ignoring stale exchange status"
        );
        Ok(())
    }

    fn transition(&self, order: &mut Order, to: OrderStatus, note: Option<String>) -> Result<()> {
        let from = order.status;
        order.transition(to, note.clone())?;
        debug!(client_order_id = %order.client_order_id, %from, %to, "Order transition");
        self.events.emit(TradingEvent::OrderTransitioned {
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            from,
            to,
            note,
            at: order.updated_at,
        });
        Ok(())
    }

    async fn persist(&self, order: &Order) {
        self.orders
            .insert(order.client_order_id.clone(), order.clone());
        if let Err(e) = self.store.save(order).await {
            warn!(client_order_id = %order.client_order_id, "Order persistence failed: {}", e);
        }
    }

    async fn finalize(&self, order: &Order) {
        if !order.is_terminal() {
            return;
        }
        self.persist(order).await;
        self.ledger.release(&order.client_order_id).await;
        match order.status {
            OrderStatus::Filled => info!(
                client_order_id = %order.client_order_id,
                symbol = %order.symbol,
                filled = %order.filled_quantity,
                avg_price = ?order.avg_fill_price,
                "Order filled"
            ),
            OrderStatus::Cancelled => info!(
                client_order_id = %order.client_order_id,
                filled = %order.filled_quantity,
                "Order cancelled"
            ),
            status => warn!(
                client_order_id = %order.client_order_id,
                %status,
                error = ?order.last_error,
                "Order ended without fill"
            ),
        }
        self.events.emit(TradingEvent::OrderTerminal {
            order: order.clone(),
        });
    }
}

/// Price of the newly filled quantity, derived from the change in average
fn fill_price(
    prev_qty: Decimal,
    prev_avg: Option<Decimal>,
    order: &Order,
    delta: Decimal,
) -> Option<Decimal> {
    let fallback = order.limit_price;
    let Some(avg) = order.avg_fill_price else {
        return fallback;
    };
    match prev_avg {
        Some(prev) if prev_qty > Decimal::ZERO => {
            let price = (avg * order.filled_quantity - prev * prev_qty) / delta;
            Some(if price > Decimal::ZERO { price } else { avg })
        }
        _ => Some(avg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CircuitBreakerConfig, CircuitState};
    use crate::domain::{OrderSide, PortfolioState};
    use crate::exchange::ExchangeResult;
    use crate::execution::InMemoryOrderStore;
    use crate::risk::RiskLimits;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Step {
        Respond(ExchangeResult<OrderReport>),
        Hang,
    }

    /// Exchange replaying scripted answers. The last queued status answer
    /// for an order repeats forever.
    #[derive(Default)]
    struct ScriptedExchange {
        place: Mutex<VecDeque<Step>>,
        status: Mutex<HashMap<String, VecDeque<ExchangeResult<OrderReport>>>>,
        place_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl ScriptedExchange {
        fn on_place(&self, step: Step) -> &Self {
            self.place.lock().unwrap().push_back(step);
            self
        }

        fn on_query(&self, id: &str, answer: ExchangeResult<OrderReport>) -> &Self {
            self.status
                .lock()
                .unwrap()
                .entry(id.to_string())
                .or_default()
                .push_back(answer);
            self
        }

        fn calls(&self) -> usize {
            self.place_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn place_order(&self, order: &Order) -> ExchangeResult<OrderReport> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            let step = self.place.lock().unwrap().pop_front();
            match step {
                Some(Step::Respond(answer)) => answer,
                Some(Step::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                None => Ok(OrderReport::new(
                    &order.client_order_id,
                    OrderStatus::Acknowledged,
                )),
            }
        }

        async fn cancel_order(&self, client_order_id: &str) -> ExchangeResult<OrderReport> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(OrderReport::new(client_order_id, OrderStatus::Cancelled))
        }

        async fn query_status(&self, client_order_id: &str) -> ExchangeResult<OrderReport> {
            let mut status = self.status.lock().unwrap();
            match status.get_mut(client_order_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => Err(ExchangeError::UnknownOrder(client_order_id.to_string())),
            }
        }
    }

    struct Harness {
        exchange: Arc<ScriptedExchange>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<ExposureLedger>,
        store: Arc<InMemoryOrderStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                exchange: Arc::new(ScriptedExchange::default()),
                breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
                ledger: Arc::new(ExposureLedger::new(
                    PortfolioState::new(dec!(10000)),
                    RiskLimits::default(),
                )),
                store: Arc::new(InMemoryOrderStore::new()),
            }
        }

        fn executor(&self, config: ExecutionConfig) -> OrderExecutor {
            OrderExecutor::new(
                self.exchange.clone(),
                self.breaker.clone(),
                self.ledger.clone(),
                self.store.clone(),
                config,
            )
        }
    }

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            fill_wait_ms: 1_000,
            ..Default::default()
        }
    }

    fn order(id: &str) -> Order {
        Order::market(id.into(), "BTC-USD", OrderSide::Buy, dec!(1))
    }

    fn ack(id: &str) -> ExchangeResult<OrderReport> {
        Ok(OrderReport::new(id, OrderStatus::Acknowledged).with_exchange_id("x-1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_timeouts_then_ack_within_ceiling() {
        let h = Harness::new();
        h.exchange
            .on_place(Step::Respond(Err(ExchangeError::Timeout)))
            .on_place(Step::Respond(Err(ExchangeError::Timeout)))
            .on_place(Step::Respond(ack("q-1")))
            .on_query("q-1", ack("q-1"));
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(h.exchange.calls(), 3);
        assert_eq!(report.order.retry_count, 2);
        assert_eq!(report.order.status, OrderStatus::Acknowledged);
        assert_eq!(report.order.exchange_order_id.as_deref(), Some("x-1"));
        assert!(report.deferred);
        assert!(!report
            .order
            .history
            .iter()
            .any(|t| t.to == OrderStatus::Failed));
        assert_eq!(h.breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_rejects_without_retry() {
        let h = Harness::new();
        h.exchange
            .on_place(Step::Respond(Err(ExchangeError::InsufficientMargin)));
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(h.exchange.calls(), 1);
        assert_eq!(report.order.status, OrderStatus::Rejected);
        assert_eq!(report.order.retry_count, 0);
        assert!(!report.deferred);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_order() {
        let h = Harness::new();
        for _ in 0..3 {
            h.exchange
                .on_place(Step::Respond(Err(ExchangeError::RateLimited)));
        }
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(h.exchange.calls(), 3);
        assert_eq!(report.order.status, OrderStatus::Failed);
        assert_eq!(report.order.retry_count, 2);
        assert!(report.order.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits_without_calling_exchange() {
        let h = Harness::new();
        h.breaker.trip("maintenance").await;
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(h.exchange.calls(), 0);
        assert!(report.circuit_open);
        assert_eq!(report.order.status, OrderStatus::Failed);
        assert_eq!(report.order.history.len(), 1);
        assert_eq!(report.order.history[0].from, OrderStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_timeout_fails_order() {
        let h = Harness::new();
        h.exchange.on_place(Step::Hang);
        let executor = h.executor(ExecutionConfig {
            submission_timeout_ms: 2_000,
            ..config()
        });

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(report.order.status, OrderStatus::Failed);
        assert!(report
            .order
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
        assert_eq!(h.exchange.cancel_calls.load(Ordering::SeqCst), 1);
        let stats = h.breaker.stats().await;
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.error_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_acks_adopt_booked_fill() {
        let h = Harness::new();
        for _ in 0..3 {
            h.exchange.on_place(Step::Respond(Err(ExchangeError::Timeout)));
        }
        h.exchange.on_query(
            "q-1",
            Ok(OrderReport::new("q-1", OrderStatus::Filled).with_fill(dec!(1), dec!(100))),
        );
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(h.exchange.calls(), 3);
        assert_eq!(report.order.status, OrderStatus::Filled);
        assert_eq!(report.fills.len(), 1);
        assert_eq!(h.exchange.cancel_calls.load(Ordering::SeqCst), 0);
        let portfolio = h.ledger.snapshot().await;
        assert_eq!(portfolio.position("BTC-USD").unwrap().net_quantity, dec!(1));
        assert!(executor.open_orders("BTC-USD").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_unreachable_exchange_stays_open() {
        let h = Harness::new();
        h.exchange.on_place(Step::Hang);
        h.exchange
            .on_query("q-1", Err(ExchangeError::Network("connection reset".into())));
        let executor = h.executor(ExecutionConfig {
            submission_timeout_ms: 2_000,
            ..config()
        });

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(report.order.status, OrderStatus::Submitted);
        assert!(report.deferred);
        assert_eq!(executor.open_orders("BTC-USD").len(), 1);

        // Next tick the exchange answers with the booked order
        h.exchange.on_query(
            "q-1",
            Ok(OrderReport::new("q-1", OrderStatus::Filled).with_fill(dec!(1), dec!(90))),
        );
        executor.reconcile_symbol("BTC-USD").await.unwrap();
        let reports = executor.reconcile_symbol("BTC-USD").await.unwrap();

        assert_eq!(reports[0].order.status, OrderStatus::Filled);
        assert!(executor.open_orders("BTC-USD").is_empty());
        let portfolio = h.ledger.snapshot().await;
        assert_eq!(portfolio.position("BTC-USD").unwrap().net_quantity, dec!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_client_id_refused() {
        let h = Harness::new();
        let executor = h.executor(ExecutionConfig {
            fill_wait_ms: 0,
            ..config()
        });

        executor.submit(order("q-1")).await.unwrap();
        let err = executor.submit(order("q-1")).await.unwrap_err();

        assert!(matches!(err, QuorumError::DuplicateClientOrderId(_)));
        assert_eq!(h.exchange.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_ids_never_collide() {
        let h = Harness::new();
        let executor = h.executor(ExecutionConfig {
            fill_wait_ms: 0,
            ..config()
        });
        for _ in 0..20 {
            let id = executor.next_client_order_id();
            executor.submit(order(&id)).await.unwrap();
        }
        assert_eq!(h.exchange.calls(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_fills_update_portfolio() {
        let h = Harness::new();
        h.exchange
            .on_query(
                "q-1",
                Ok(OrderReport::new("q-1", OrderStatus::PartiallyFilled)
                    .with_fill(dec!(0.4), dec!(100))),
            )
            .on_query(
                "q-1",
                Ok(OrderReport::new("q-1", OrderStatus::Filled).with_fill(dec!(1), dec!(100))),
            );
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();

        assert_eq!(report.order.status, OrderStatus::Filled);
        assert_eq!(report.fills.len(), 2);
        assert_eq!(report.fills[0].quantity, dec!(0.4));
        assert_eq!(report.fills[1].quantity, dec!(0.6));
        assert_eq!(report.fills[1].price, dec!(100));
        assert!(!report.deferred);

        let portfolio = h.ledger.snapshot().await;
        let position = portfolio.position("BTC-USD").unwrap();
        assert_eq!(position.net_quantity, dec!(1));
        assert_eq!(position.avg_entry_price, dec!(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_order_reconciled_next_tick() {
        let h = Harness::new();
        h.exchange.on_query("q-1", ack("q-1"));
        let executor = h.executor(config());

        let report = executor.submit(order("q-1")).await.unwrap();
        assert!(report.deferred);
        assert_eq!(executor.open_orders("BTC-USD").len(), 1);

        h.exchange.on_query(
            "q-1",
            Ok(OrderReport::new("q-1", OrderStatus::Filled).with_fill(dec!(1), dec!(50))),
        );
        // The sticky ack is still first in line
        executor.reconcile_symbol("BTC-USD").await.unwrap();
        let reports = executor.reconcile_symbol("BTC-USD").await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].order.status, OrderStatus::Filled);
        assert!(executor.open_orders("BTC-USD").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_live_order() {
        let h = Harness::new();
        h.exchange.on_query("q-1", ack("q-1"));
        let executor = h.executor(config());
        executor.submit(order("q-1")).await.unwrap();

        let report = executor.cancel("q-1").await.unwrap();
        assert_eq!(report.order.status, OrderStatus::Cancelled);

        // A second cancel is a no-op
        let again = executor.cancel("q-1").await.unwrap();
        assert_eq!(again.order.history.len(), report.order.history.len());

        assert!(matches!(
            executor.cancel("missing").await,
            Err(QuorumError::Order(OrderError::NotFound { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_order_refuses_contradicting_report() {
        let h = Harness::new();
        h.exchange
            .on_place(Step::Respond(Err(ExchangeError::InvalidSymbol("BTC-USD".into()))));
        let executor = h.executor(config());
        let mut report = executor.submit(order("q-1")).await.unwrap();
        assert_eq!(report.order.status, OrderStatus::Rejected);

        let mut fills = Vec::new();
        let err = executor
            .apply_report(
                &mut report.order,
                OrderReport::new("q-1", OrderStatus::Filled).with_fill(dec!(1), dec!(100)),
                &mut fills,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::InvalidStateTransition { .. }));
        assert_eq!(report.order.status, OrderStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reconciliation() {
        let h = Harness::new();

        let pending = order("q-pending");
        let mut submitted = order("q-filled");
        submitted.transition(OrderStatus::Submitted, None).unwrap();
        let mut lost = order("q-lost");
        lost.transition(OrderStatus::Submitted, None).unwrap();
        let mut done = order("q-done");
        done.transition(OrderStatus::Submitted, None).unwrap();
        done.transition(OrderStatus::Rejected, None).unwrap();
        for o in [&pending, &submitted, &lost, &done] {
            h.store.save(o).await.unwrap();
        }
        h.exchange.on_query(
            "q-filled",
            Ok(OrderReport::new("q-filled", OrderStatus::Filled).with_fill(dec!(1), dec!(200))),
        );

        let executor = h.executor(config());
        let reports = executor.reconcile_open_orders().await.unwrap();

        let status: HashMap<String, OrderStatus> = reports
            .iter()
            .map(|r| (r.order.client_order_id.clone(), r.order.status))
            .collect();
        assert_eq!(status.len(), 3);
        assert_eq!(status["q-pending"], OrderStatus::Failed);
        assert_eq!(status["q-filled"], OrderStatus::Filled);
        assert_eq!(status["q-lost"], OrderStatus::Failed);
        assert!(h.store.load_open().await.unwrap().is_empty());

        let position = h.ledger.snapshot().await;
        assert_eq!(position.position("BTC-USD").unwrap().net_quantity, dec!(1));

        // Ids from the previous run stay taken
        assert!(matches!(
            executor.submit(order("q-done")).await,
            Err(QuorumError::DuplicateClientOrderId(_))
        ));
    }
}
