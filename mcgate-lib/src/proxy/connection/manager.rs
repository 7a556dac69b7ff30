use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::guards::{ConnectionGuard, OnlineGuard};
use crate::proxy::metrics::ConnectionCount;

/// Errors that can occur when trying to accept a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Server is shutting down")]
    Shutdown,
}

/// Tracks every live connection across all services for the shutdown drain.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    shutting_down: AtomicBool,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Register a new connection of `service`.
    pub fn try_accept(
        &self,
        peer: SocketAddr,
        service: &Arc<ConnectionCount>,
    ) -> Result<ConnectionGuard, ConnectionError> {
        if self.is_shutdown() {
            debug!(%peer, "rejecting connection during shutdown");
            return Err(ConnectionError::Shutdown);
        }
        Ok(ConnectionGuard::new(self.active.clone(), service.clone()))
    }

    /// Wait until no connection is active or `timeout` elapses.
    ///
    /// Returns the number of connections still open.
    pub async fn wait_idle(&self, timeout: Duration) -> usize {
        info!("Waiting for active connections to finish (timeout: {}s)", timeout.as_secs());
        let start = Instant::now();
        loop {
            let active = self.active();
            if active == 0 {
                info!("All connections closed");
                return 0;
            }
            if start.elapsed() >= timeout {
                warn!(active_connections = active, "Shutdown timeout reached, {} connections still active", active);
                return active;
            }
            debug!(active_connections = active, "Waiting for connections to close");
            sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Live player count of one service.
#[derive(Debug, Default)]
pub struct OnlineCounter {
    online: Arc<AtomicI64>,
}

impl OnlineCounter {
    pub fn current(&self) -> i64 {
        self.online.load(Ordering::Acquire)
    }

    /// Count one more player unless `limit` is set and already reached.
    pub fn try_acquire(&self, limit: Option<i64>) -> Option<OnlineGuard> {
        let admitted = self
            .online
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .is_ok();
        admitted.then(|| OnlineGuard::new(self.online.clone()))
    }
}

/// Online counters keyed by service name.
///
/// Lives as long as the process so caps stay accurate across reloads.
#[derive(Debug, Default)]
pub struct OnlineCounters {
    counters: Mutex<AHashMap<String, Arc<OnlineCounter>>>,
}

impl OnlineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter of `service`, created on first use.
    pub fn get(&self, service: &str) -> Arc<OnlineCounter> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.entry(service.to_string()).or_default().clone()
    }

    /// Drop idle counters of services that no longer exist.
    pub fn retain_services<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let keep: Vec<&str> = names.into_iter().collect();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.retain(|name, c| keep.contains(&name.as_str()) || c.current() > 0);
    }

    pub fn total(&self) -> i64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.values().map(|c| c.current()).sum()
    }
}
