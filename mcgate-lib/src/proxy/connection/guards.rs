use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::proxy::metrics::ConnectionCount;

/// Held for the lifetime of an accepted connection.
///
/// Dropping it decrements both the process-wide active count used by the
/// shutdown drain and the owning service's counters.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
    service: Arc<ConnectionCount>,
}

impl ConnectionGuard {
    pub(super) fn new(active: Arc<AtomicUsize>, service: Arc<ConnectionCount>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        service.increment();
        Self { active, service }
    }

    pub fn service(&self) -> &ConnectionCount {
        &self.service
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.service.decrement();
    }
}

/// Held for the lifetime of a relayed login session; keeps the service's
/// online count up to date.
#[derive(Debug)]
pub struct OnlineGuard {
    online: Arc<AtomicI64>,
}

impl OnlineGuard {
    pub(super) fn new(online: Arc<AtomicI64>) -> Self {
        Self { online }
    }
}

impl Drop for OnlineGuard {
    fn drop(&mut self) {
        self.online.fetch_sub(1, Ordering::AcqRel);
    }
}
