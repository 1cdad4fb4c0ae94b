pub mod agents;
pub mod collector;
pub mod config;
pub mod consensus;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod events;
pub mod exchange;
pub mod execution;
pub mod market;
pub mod performance;
pub mod risk;

pub use agents::{AgentEvaluator, AgentKind, AgentRegistry, AgentSpec};
pub use collector::{CollectorConfig, SignalCollector};
pub use config::{AppConfig, LoggingConfig};
pub use consensus::{Arbiter, ArbiterConfig, ArbitrationEvaluator, ConsensusConfig, ConsensusEngine};
pub use coordination::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ShutdownHandle, ShutdownSignal,
};
pub use coordinator::{CoordinatorParts, EngineConfig, TickOutcome, TradingCoordinator};
pub use domain::{
    ConsensusDecision, MarketSnapshot, Order, OrderSide, OrderStatus, PortfolioState, Signal,
    SignalSide,
};
pub use error::{ExchangeError, OrderError, QuorumError, Result, RiskError};
pub use events::{EventDispatcher, EventSink, EventsConfig, TradingEvent};
pub use exchange::{ExchangeClient, OrderReport, PaperExchange};
pub use execution::{ExecutionConfig, ExecutionReport, OrderExecutor, OrderStore, RetryPolicy};
pub use market::{MarketDataConfig, MarketDataSource, SyntheticFeed};
pub use performance::{PerformanceConfig, PerformanceTracker, TradeOutcome, WeightsHandle};
pub use risk::{ExposureLedger, RiskLimits, RiskManager, RiskVerdict};
