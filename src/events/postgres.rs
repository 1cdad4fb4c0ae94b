//! Postgres event store

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::dispatcher::{EventEnvelope, EventSink};
use crate::error::Result;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trading_events (
    id UUID PRIMARY KEY,
    sequence BIGINT NOT NULL,
    event_type TEXT NOT NULL,
    category TEXT NOT NULL,
    symbol TEXT,
    payload JSONB NOT NULL,
    emitted_at TIMESTAMPTZ NOT NULL
)
"#;

/// Append-only event table for audit and dashboards
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        info!("Postgres event store connected");
        Ok(store)
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for PostgresEventStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload = serde_json::to_value(&envelope.event)?;

        sqlx::query(
            r#"
            INSERT INTO trading_events (
                id, sequence, event_type, category, symbol, payload, emitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(envelope.id)
        .bind(envelope.sequence as i64)
        .bind(envelope.event.kind())
        .bind(&envelope.category)
        .bind(envelope.event.symbol())
        .bind(&payload)
        .bind(envelope.emitted_at)
        .execute(&self.pool)
        .await?;

        debug!(
            "Appended event {} (type: {}, seq: {})",
            envelope.id,
            envelope.event.kind(),
            envelope.sequence
        );
        Ok(())
    }
}
