use thiserror::Error;

/// Main error type for the decision core
#[derive(Error, Debug)]
pub enum QuorumError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Stale data: {0}")]
    StaleData(String),

    // Agent errors (always downgraded to abstention by the collector)
    #[error("Agent {agent} failed: {reason}")]
    AgentFailure { agent: String, reason: String },

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    // Order execution errors
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Duplicate client order id: {0}")]
    DuplicateClientOrderId(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    // State machine errors
    #[error("Invalid state transition for {client_order_id}: from {from} to {to}")]
    InvalidStateTransition {
        client_order_id: String,
        from: String,
        to: String,
    },

    // Risk management errors
    #[error(transparent)]
    Risk(#[from] RiskError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for QuorumError
pub type Result<T> = std::result::Result<T, QuorumError>;

/// Failures reported by the exchange client, classified for retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Request timed out")]
    Timeout,

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Insufficient margin")]
    InsufficientMargin,

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

impl ExchangeError {
    /// Transient failures are retried; everything else is terminal for the order.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout
                | ExchangeError::Server { .. }
                | ExchangeError::RateLimited
                | ExchangeError::Network(_)
        )
    }
}

/// Specific error types for order execution
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("Order not found: {client_order_id}")]
    NotFound { client_order_id: String },

    #[error("Submission timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Max retries exceeded: {attempts}")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Order size must be positive")]
    NonPositiveSize,
}

/// Specific error types for risk management
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Reservation not found for {client_order_id}")]
    ReservationNotFound { client_order_id: String },

    #[error("Mark price unavailable for {symbol}")]
    MissingMark { symbol: String },
}
