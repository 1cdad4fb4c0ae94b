use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::TradingEvent;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bounded queue between the tick loop and the sinks
    pub capacity: usize,
    pub log_events: bool,
    /// Append-only JSONL journal
    pub journal_path: Option<PathBuf>,
    /// Notification webhook for terminal events
    pub webhook_url: Option<String>,
    /// Postgres event store (requires the `postgres` feature)
    pub database_url: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            log_events: true,
            journal_path: None,
            webhook_url: None,
            database_url: None,
        }
    }
}

/// An event with its delivery metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    /// Emission order within this process
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub category: String,
    #[serde(flatten)]
    pub event: TradingEvent,
}

/// Destination for events. Errors are logged by the dispatcher and dropped.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Fire-and-forget event publisher. Cheap to clone.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<EventEnvelope>,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Dispatcher plus the receiving end, for callers that drive delivery themselves
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                sequence: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Dispatcher with a background task delivering to every sink in order
    pub fn spawn(capacity: usize, sinks: Vec<Arc<dyn EventSink>>) -> (Self, JoinHandle<()>) {
        let (dispatcher, mut rx) = Self::channel(capacity);
        let handle = tokio::spawn(async move {
            info!(sinks = sinks.len(), "Event dispatcher started");
            while let Some(envelope) = rx.recv().await {
                for sink in &sinks {
                    if let Err(e) = sink.handle(&envelope).await {
                        warn!(
                            sink = sink.name(),
                            event = envelope.event.kind(),
                            error = %e,
                            "Event sink failed"
                        );
                    }
                }
            }
            debug!("Event dispatcher stopped");
        });
        (dispatcher, handle)
    }

    /// Dispatcher that discards everything
    pub fn disabled() -> Self {
        let (dispatcher, _rx) = Self::channel(1);
        dispatcher
    }

    /// Queue an event without waiting. A full queue drops the event.
    pub fn emit(&self, event: TradingEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            emitted_at: Utc::now(),
            category: event.category().to_string(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event = envelope.event.kind(),
                    dropped, "Event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
