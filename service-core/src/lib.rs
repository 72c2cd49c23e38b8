pub mod bus;
pub mod config;
pub mod error;
pub mod observability;
pub mod outbox;

// Re-exported so service crates share a single version of the
// runtime-facing dependencies.
pub use async_trait;
pub use tokio;
