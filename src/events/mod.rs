//! Structured trading events
//!
//! The tick loop emits events without waiting; a background task fans them
//! out to sinks (log, JSONL journal, webhook, optional Postgres). Sink
//! failures never reach the trading path.

mod dispatcher;
mod sinks;
mod types;

#[cfg(feature = "postgres")]
mod postgres;

pub use dispatcher::{EventDispatcher, EventEnvelope, EventSink, EventsConfig};
pub use sinks::{JsonlJournal, LogSink, WebhookNotifier};
pub use types::{EventCategory, TradingEvent};

#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;

use std::sync::Arc;

use crate::error::Result;

/// Sinks enabled by `config`
pub async fn build_sinks(config: &EventsConfig) -> Result<Vec<Arc<dyn EventSink>>> {
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    if config.log_events {
        sinks.push(Arc::new(LogSink));
    }
    if let Some(path) = &config.journal_path {
        sinks.push(Arc::new(JsonlJournal::open(path).await?));
    }
    if let Some(url) = &config.webhook_url {
        sinks.push(Arc::new(WebhookNotifier::new(url.clone())));
    }
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        sinks.push(Arc::new(PostgresEventStore::connect(url).await?));
    }
    Ok(sinks)
}
