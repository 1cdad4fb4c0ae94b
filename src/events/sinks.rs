use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dispatcher::{EventEnvelope, EventSink};
use super::types::EventCategory;
use crate::error::{QuorumError, Result};

/// Writes every event to the tracing log
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let category = envelope.event.category();
        let summary = envelope.event.summary();
        match category {
            EventCategory::ExchangeRejected
            | EventCategory::OrderFailed
            | EventCategory::CircuitPaused => {
                warn!(category = %category, seq = envelope.sequence, "{}", summary)
            }
            EventCategory::Audit => debug!(seq = envelope.sequence, "{}", summary),
            _ => info!(category = %category, seq = envelope.sequence, "{}", summary),
        }
        Ok(())
    }
}

/// Append-only JSON-lines journal
pub struct JsonlJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlJournal {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Event journal opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonlJournal {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: String,
    category: &'a str,
    event: &'a EventEnvelope,
}

/// Posts notifiable events to a webhook. Everything else is ignored.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Self {
        info!("Webhook notifications enabled");
        Self {
            client: Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl EventSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        if !envelope.event.is_notifiable() {
            return Ok(());
        }

        let message = WebhookMessage {
            text: envelope.event.summary(),
            category: &envelope.category,
            event: envelope,
        };
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!(event = envelope.event.kind(), "Webhook notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(QuorumError::Internal(format!(
                "webhook returned HTTP {}: {}",
                status, body
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TradingEvent;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(sequence: u64, symbol: &str) -> EventEnvelope {
        let event = TradingEvent::StaleSnapshot {
            symbol: symbol.into(),
            age_ms: 12_000,
            at: Utc::now(),
        };
        EventEnvelope {
            id: Uuid::new_v4(),
            sequence,
            emitted_at: Utc::now(),
            category: event.category().to_string(),
            event,
        }
    }

    #[tokio::test]
    async fn test_journal_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal/events.jsonl");

        let journal = JsonlJournal::open(&path).await.unwrap();
        journal.handle(&envelope(0, "BTC-USD")).await.unwrap();
        journal.handle(&envelope(1, "ETH-USD")).await.unwrap();
        drop(journal);

        // reopening appends
        let journal = JsonlJournal::open(&path).await.unwrap();
        journal.handle(&envelope(2, "SOL-USD")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "stale_snapshot");
        assert_eq!(lines[1]["symbol"], "ETH-USD");
        assert_eq!(lines[2]["sequence"], 2);
        assert_eq!(lines[2]["category"], "stale_data");
    }

    #[tokio::test]
    async fn test_webhook_skips_non_notifiable_events() {
        // nothing listens on this port; a request would fail
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook".into());
        assert!(notifier.handle(&envelope(0, "BTC-USD")).await.is_ok());
    }
}
