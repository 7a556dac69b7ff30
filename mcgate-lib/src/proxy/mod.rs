pub mod connection;
pub mod context;
pub mod metrics;
pub mod pipeline;
pub mod relay;
pub mod stream;

pub use connection::{ConnectionGuard, ConnectionTracker, OnlineCounter, OnlineCounters, OnlineGuard};
pub use context::ConnectionContext;
pub use metrics::{ConnectionCount, ConnectionSnapshot};
pub use pipeline::{resolve_any_dest, Pipeline, SessionEnd};
pub use relay::{relay, RelayStats};
pub use stream::PrefixedStream;
