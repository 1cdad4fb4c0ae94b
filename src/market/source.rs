use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::synthetic::SyntheticConfig;
use crate::domain::MarketSnapshot;
use crate::error::{QuorumError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Snapshots older than this are rejected and the tick goes FLAT
    pub max_snapshot_age_ms: i64,
    /// Random-walk feed used by `quorum run`
    pub synthetic: SyntheticConfig,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            max_snapshot_age_ms: 5_000,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl MarketDataConfig {
    pub fn max_age(&self) -> Duration {
        Duration::milliseconds(self.max_snapshot_age_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_snapshot_age_ms <= 0 {
            return Err(QuorumError::InvalidConfig(
                "market_data.max_snapshot_age_ms must be positive".into(),
            ));
        }
        self.synthetic.validate()
    }
}

/// Pull source of market snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Latest snapshot for `symbol`
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

/// Reject snapshots older than `max_age` at `now`
pub fn ensure_fresh(snapshot: &MarketSnapshot, max_age: Duration, now: DateTime<Utc>) -> Result<()> {
    if snapshot.is_stale(max_age, now) {
        return Err(QuorumError::StaleData(format!(
            "{} snapshot is {}ms old (max {}ms)",
            snapshot.symbol,
            snapshot.age(now).num_milliseconds(),
            max_age.num_milliseconds()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTC-USD".into(),
            timestamp: at,
            best_bid: dec!(99),
            best_ask: dec!(101),
            last_trades: vec![],
            volatility: dec!(1),
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let max_age = Duration::milliseconds(500);
        assert!(ensure_fresh(&snapshot(now - Duration::milliseconds(500)), max_age, now).is_ok());
        assert!(matches!(
            ensure_fresh(&snapshot(now - Duration::milliseconds(501)), max_age, now),
            Err(QuorumError::StaleData(_))
        ));
        // Clock skew puts the snapshot in the future: age is zero
        assert!(ensure_fresh(&snapshot(now + Duration::seconds(2)), max_age, now).is_ok());
    }

    #[tokio::test]
    async fn test_mocked_source() {
        let mut source = MockMarketDataSource::new();
        source
            .expect_snapshot()
            .withf(|symbol| symbol == "BTC-USD")
            .times(1)
            .returning(|_| Ok(snapshot(Utc::now())));
        source
            .expect_snapshot()
            .withf(|symbol| symbol == "DOGE-USD")
            .returning(|s| Err(QuorumError::MarketDataUnavailable(s.to_string())));

        assert_eq!(source.snapshot("BTC-USD").await.unwrap().symbol, "BTC-USD");
        assert!(source.snapshot("DOGE-USD").await.is_err());
    }
}
