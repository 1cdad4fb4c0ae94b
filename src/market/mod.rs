//! Market data collaborator boundary
//!
//! The decision core only pulls snapshots and checks their freshness;
//! ingestion and normalization live behind `MarketDataSource`.

mod source;
mod synthetic;

pub use source::{ensure_fresh, MarketDataConfig, MarketDataSource};
pub use synthetic::{SyntheticConfig, SyntheticFeed};

#[cfg(test)]
pub use source::MockMarketDataSource;
