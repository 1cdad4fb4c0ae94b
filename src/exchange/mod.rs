mod paper;
mod traits;

pub use paper::PaperExchange;
pub use traits::{ExchangeClient, ExchangeResult, OrderReport};
