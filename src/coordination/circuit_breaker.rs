//! Exchange circuit breaker
//!
//! Tracks a rolling error rate of exchange calls. Once the rate crosses the
//! threshold the breaker opens and submissions short-circuit for a cooldown,
//! then a limited number of probe orders decide between closing and
//! re-opening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{QuorumError, Result};
use crate::events::{EventDispatcher, TradingEvent};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Error rate exceeded, submissions refused
    Open,
    /// Cooldown elapsed, probe orders allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Error rate in [0, 1] that trips the breaker
    pub error_rate_threshold: f64,
    /// Samples older than this are forgotten
    pub window_secs: u64,
    /// At most this many recent samples are kept
    pub window_max_samples: usize,
    /// No trip below this many samples in the window
    pub min_samples: usize,
    /// Time spent open before probing
    pub cooldown_secs: u64,
    /// Concurrent probes admitted while half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            window_secs: 60,
            window_max_samples: 50,
            min_samples: 5,
            cooldown_secs: 30,
            half_open_max_probes: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err(QuorumError::InvalidConfig(format!(
                "circuit_breaker.error_rate_threshold must be within (0, 1], got {}",
                self.error_rate_threshold
            )));
        }
        if self.min_samples == 0 || self.window_max_samples < self.min_samples {
            return Err(QuorumError::InvalidConfig(
                "circuit_breaker.min_samples must be positive and <= window_max_samples".into(),
            ));
        }
        if self.half_open_max_probes == 0 {
            return Err(QuorumError::InvalidConfig(
                "circuit_breaker.half_open_max_probes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Why the breaker opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripReason {
    ErrorRate { rate: f64, samples: usize },
    ProbeFailed { error: String },
    Manual { reason: String },
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ErrorRate { rate, samples } => {
                write!(f, "error rate {:.0}% over {} calls", rate * 100.0, samples)
            }
            TripReason::ProbeFailed { error } => write!(f, "probe failed: {}", error),
            TripReason::Manual { reason } => write!(f, "manual: {}", reason),
        }
    }
}

/// Permission to call the exchange, returned by `try_acquire`.
///
/// Report the outcome with `record_success` / `record_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// (when, was_error)
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    last_trip_reason: Option<TripReason>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn prune(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        let window = config.window();
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > window || self.samples.len() > config.window_max_samples {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let errors = self.samples.iter().filter(|(_, e)| *e).count();
        errors as f64 / self.samples.len() as f64
    }
}

/// Circuit breaker for exchange submissions
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
    total_trips: AtomicU64,
    events: EventDispatcher,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                probes_in_flight: 0,
                last_trip_reason: None,
                last_success: None,
                last_failure: None,
            }),
            total_trips: AtomicU64::new(0),
            events: EventDispatcher::disabled(),
        }
    }

    /// Publish state changes through `events`
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Ask to call the exchange. Fails with `CircuitOpen` while open or when
    /// every half-open probe slot is taken.
    pub async fn try_acquire(&self) -> Result<Admission> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.duration_since(at))
                .unwrap_or_default();
            if elapsed < self.config.cooldown() {
                let retry_in = self.config.cooldown() - elapsed;
                return Err(QuorumError::CircuitOpen(format!(
                    "{} retry in {}ms",
                    inner
                        .last_trip_reason
                        .as_ref()
                        .map(|r| format!("{},", r))
                        .unwrap_or_default(),
                    retry_in.as_millis()
                )));
            }
            self.set_state(&mut inner, CircuitState::HalfOpen, None);
            inner.probes_in_flight = 0;
        }

        if inner.state == CircuitState::Closed {
            return Ok(Admission::Normal);
        }
        if inner.probes_in_flight >= self.config.half_open_max_probes {
            return Err(QuorumError::CircuitOpen(
                "half-open probe already in flight".to_string(),
            ));
        }
        inner.probes_in_flight += 1;
        debug!(probes = inner.probes_in_flight, "Circuit breaker admitted probe");
        Ok(Admission::Probe)
    }

    /// The exchange answered (including permanent rejections)
    pub async fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.samples.push_back((now, false));
        inner.prune(&self.config, now);
        inner.last_success = Some(Utc::now());

        if admission == Admission::Probe && inner.state == CircuitState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            inner.samples.clear();
            inner.opened_at = None;
            self.set_state(&mut inner, CircuitState::Closed, Some("probe succeeded".into()));
        }
    }

    /// A transient exchange failure
    pub async fn record_failure(&self, admission: Admission, error: &str) {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.samples.push_back((now, true));
        inner.prune(&self.config, now);
        inner.last_failure = Some(Utc::now());

        match (admission, inner.state) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                self.open(
                    &mut inner,
                    TripReason::ProbeFailed {
                        error: error.to_string(),
                    },
                );
            }
            (_, CircuitState::Closed) => {
                let samples = inner.samples.len();
                let rate = inner.error_rate();
                debug!(rate, samples, error, "Exchange failure recorded");
                if samples >= self.config.min_samples && rate >= self.config.error_rate_threshold {
                    self.open(&mut inner, TripReason::ErrorRate { rate, samples });
                }
            }
            _ => {}
        }
    }

    /// Open the breaker by hand
    pub async fn trip(&self, reason: &str) {
        let mut inner = self.inner.write().await;
        self.open(
            &mut inner,
            TripReason::Manual {
                reason: reason.to_string(),
            },
        );
    }

    /// Close the breaker by hand, forgetting the error history
    pub async fn force_close(&self) {
        let mut inner = self.inner.write().await;
        inner.samples.clear();
        inner.opened_at = None;
        inner.probes_in_flight = 0;
        inner.last_trip_reason = None;
        if inner.state != CircuitState::Closed {
            self.set_state(&mut inner, CircuitState::Closed, Some("force closed".into()));
        }
        warn!("Circuit breaker force-closed");
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.prune(&self.config, now);
        CircuitBreakerStats {
            state: inner.state,
            error_rate: inner.error_rate(),
            samples: inner.samples.len(),
            probes_in_flight: inner.probes_in_flight,
            open_for: inner.opened_at.map(|at| now.duration_since(at)),
            last_trip_reason: inner.last_trip_reason.clone(),
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }

    fn open(&self, inner: &mut BreakerInner, reason: TripReason) {
        inner.opened_at = Some(Instant::now());
        inner.probes_in_flight = 0;
        inner.last_trip_reason = Some(reason.clone());
        self.total_trips.fetch_add(1, Ordering::SeqCst);
        warn!("Circuit breaker TRIPPED: {}", reason);
        if inner.state != CircuitState::Open {
            self.set_state(inner, CircuitState::Open, Some(reason.to_string()));
        }
    }

    fn set_state(&self, inner: &mut BreakerInner, to: CircuitState, reason: Option<String>) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Closed => info!("Circuit breaker CLOSED - normal operation resumed"),
            CircuitState::HalfOpen => info!("Circuit breaker transitioning to HALF-OPEN"),
            CircuitState::Open => {}
        }
        self.events.emit(TradingEvent::CircuitStateChanged {
            from,
            to,
            reason,
            at: Utc::now(),
        });
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub error_rate: f64,
    pub samples: usize,
    pub probes_in_flight: u32,
    pub open_for: Option<Duration>,
    pub last_trip_reason: Option<TripReason>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_trips: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            error_rate_threshold: 0.5,
            min_samples: 4,
            cooldown_secs: 10,
            ..Default::default()
        })
    }

    async fn fail(cb: &CircuitBreaker) {
        let admission = cb.try_acquire().await.unwrap();
        cb.record_failure(admission, "timeout").await;
    }

    async fn succeed(cb: &CircuitBreaker) {
        let admission = cb.try_acquire().await.unwrap();
        cb.record_success(admission).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_on_error_rate_after_min_samples() {
        let cb = breaker();
        fail(&cb).await;
        fail(&cb).await;
        fail(&cb).await;
        // 3 samples, below min_samples
        assert_eq!(cb.state().await, CircuitState::Closed);

        succeed(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        fail(&cb).await;
        // 4 errors out of 5
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(matches!(
            cb.try_acquire().await,
            Err(QuorumError::CircuitOpen(_))
        ));
        assert_eq!(cb.stats().await.total_trips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_error_rate_stays_closed() {
        let cb = breaker();
        for _ in 0..10 {
            succeed(&cb).await;
            succeed(&cb).await;
            fail(&cb).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
        let stats = cb.stats().await;
        assert!(stats.error_rate < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_leave_the_window() {
        let cb = breaker();
        for _ in 0..3 {
            fail(&cb).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        succeed(&cb).await;
        succeed(&cb).await;
        succeed(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.stats().await.samples, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_probe_closes_on_success() {
        let cb = breaker();
        cb.trip("maintenance").await;
        assert!(cb.try_acquire().await.is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.try_acquire().await.unwrap();
        assert_eq!(probe, Admission::Probe);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        // only one probe at a time
        assert!(cb.try_acquire().await.is_err());

        cb.record_success(probe).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.try_acquire().await.unwrap(), Admission::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = breaker();
        cb.trip("maintenance").await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = cb.try_acquire().await.unwrap();
        cb.record_failure(probe, "503").await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(matches!(
            cb.stats().await.last_trip_reason,
            Some(TripReason::ProbeFailed { .. })
        ));

        // cooldown restarts from the failed probe
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().await.is_err());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.try_acquire().await.unwrap(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close() {
        let cb = breaker();
        cb.trip("test").await;
        cb.force_close().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.stats().await.last_trip_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_published() {
        let (events, mut rx) = EventDispatcher::channel(8);
        let cb = breaker().with_events(events);
        cb.trip("test").await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.try_acquire().await.unwrap();
        cb.record_success(probe).await;

        let mut seen = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let TradingEvent::CircuitStateChanged { to, .. } = envelope.event {
                seen.push(to);
            }
        }
        assert_eq!(
            seen,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }
}
