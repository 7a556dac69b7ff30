mod guards;
mod manager;

pub use guards::{ConnectionGuard, OnlineGuard};
pub use manager::{ConnectionError, ConnectionTracker, OnlineCounter, OnlineCounters};
