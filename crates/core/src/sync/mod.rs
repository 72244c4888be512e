//! Sync domain models, queue contract, and retry policy.

mod model;
mod queue;
mod retry;

pub use model::*;
pub use queue::*;
pub use retry::*;
