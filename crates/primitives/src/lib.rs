//! Core primitives shared by the indexer crates.
/// RPC transport retries
pub mod retries;
/// Cooperative throttling of rate-limited calls
pub mod throttle;

pub use throttle::Throttle;
