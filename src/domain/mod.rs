pub mod decision;
pub mod market;
pub mod order;
pub mod portfolio;
pub mod signal;

pub use decision::*;
pub use market::*;
pub use order::*;
pub use portfolio::*;
pub use signal::*;
