//! Random-walk market for paper trading

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::trace;

use super::source::MarketDataSource;
use crate::domain::{MarketSnapshot, Trade};
use crate::error::{QuorumError, Result};

const BPS: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Starting price per symbol
    pub start_prices: HashMap<String, Decimal>,
    pub default_start_price: Decimal,
    /// Largest move of a single trade, in basis points
    pub step_bps: f64,
    pub spread_bps: f64,
    pub trades_per_tick: usize,
    /// Trades kept on the tape
    pub tape_len: usize,
    /// Ticks averaged into the volatility estimate
    pub atr_window: usize,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            start_prices: HashMap::new(),
            default_start_price: dec!(100),
            step_bps: 15.0,
            spread_bps: 2.0,
            trades_per_tick: 5,
            tape_len: 20,
            atr_window: 14,
            seed: None,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_start_price <= Decimal::ZERO
            || self.start_prices.values().any(|p| *p <= Decimal::ZERO)
        {
            return Err(QuorumError::InvalidConfig(
                "market_data.synthetic start prices must be positive".into(),
            ));
        }
        if !(self.step_bps >= 0.0 && self.spread_bps >= 0.0) {
            return Err(QuorumError::InvalidConfig(
                "market_data.synthetic step/spread must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Walk {
    price: f64,
    tape: VecDeque<Trade>,
    ranges: VecDeque<f64>,
}

/// Pull source generating a random walk per symbol on every call
pub struct SyntheticFeed {
    config: SyntheticConfig,
    walks: DashMap<String, Walk>,
    rng: Mutex<StdRng>,
}

impl SyntheticFeed {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            walks: DashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    fn start_price(&self, symbol: &str) -> f64 {
        let price = self
            .config
            .start_prices
            .get(symbol)
            .copied()
            .unwrap_or(self.config.default_start_price);
        price.to_f64().unwrap_or(100.0)
    }

    /// Advance the walk one tick; returns (trades, high-low range)
    fn step(&self, start: f64) -> Result<(Vec<f64>, f64)> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| QuorumError::Internal("synthetic rng poisoned".into()))?;
        let step = self.config.step_bps / BPS;
        let mut price = start;
        let (mut high, mut low) = (start, start);
        let mut prints = Vec::with_capacity(self.config.trades_per_tick);
        for _ in 0..self.config.trades_per_tick {
            let change = if step > 0.0 { rng.gen_range(-step..step) } else { 0.0 };
            price = (price * (1.0 + change)).max(0.01);
            high = high.max(price);
            low = low.min(price);
            prints.push(price);
        }
        Ok((prints, high - low))
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(4))
        .ok_or_else(|| QuorumError::Internal(format!("non-finite synthetic price {}", value)))
}

#[async_trait]
impl MarketDataSource for SyntheticFeed {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let now = Utc::now();
        let mut walk = self.walks.entry(symbol.to_string()).or_insert_with(|| Walk {
            price: self.start_price(symbol),
            tape: VecDeque::new(),
            ranges: VecDeque::new(),
        });

        let (prints, range) = self.step(walk.price)?;
        for (i, price) in prints.into_iter().enumerate() {
            walk.price = price;
            walk.tape.push_back(Trade {
                price: to_decimal(price)?,
                size: Decimal::from(i % 3 + 1),
                timestamp: now,
            });
        }
        while walk.tape.len() > self.config.tape_len.max(1) {
            walk.tape.pop_front();
        }
        walk.ranges.push_back(range);
        while walk.ranges.len() > self.config.atr_window.max(1) {
            walk.ranges.pop_front();
        }

        let atr = walk.ranges.iter().sum::<f64>() / walk.ranges.len() as f64;
        let half_spread = walk.price * self.config.spread_bps / BPS / 2.0;
        let snapshot = MarketSnapshot {
            symbol: symbol.to_string(),
            timestamp: now,
            best_bid: to_decimal(walk.price - half_spread)?,
            best_ask: to_decimal(walk.price + half_spread)?,
            last_trades: walk.tape.iter().copied().collect(),
            volatility: to_decimal(atr)?,
        };
        trace!(symbol, mid = %snapshot.mid(), atr = %snapshot.volatility, "Synthetic snapshot");
        Ok(snapshot)
    }
}
