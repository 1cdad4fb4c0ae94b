mod executor;
mod ids;
mod retry;
mod store;

pub use executor::{AppliedFill, ExecutionConfig, ExecutionReport, OrderExecutor};
pub use ids::ClientOrderIdGenerator;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use store::{InMemoryOrderStore, JsonFileOrderStore, OrderStore};
