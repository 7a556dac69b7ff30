use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ServiceConfig};
use crate::error::{ProxyError, Result};
use crate::outbound::{apply_socket_options, build_dialer, Dialer};
use crate::proxy::{ConnectionCount, ConnectionTracker, OnlineCounters, Pipeline};
use crate::quota::QuotaLedger;

/// Listeners started from one configuration snapshot.
struct Generation {
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
    bound: Vec<(String, SocketAddr)>,
}

/// Owns the listening sockets and swaps them as a whole on reload.
pub struct ServiceManager {
    config: Arc<ArcSwap<Config>>,
    ledger: Arc<QuotaLedger>,
    tracker: Arc<ConnectionTracker>,
    online: Arc<OnlineCounters>,
    dialer: Option<Arc<dyn Dialer>>,
    current: Option<Generation>,
    generation: u64,
}

impl ServiceManager {
    pub fn new(config: Arc<Config>, ledger: Arc<QuotaLedger>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
            ledger,
            tracker: Arc::new(ConnectionTracker::new()),
            online: Arc::new(OnlineCounters::new()),
            dialer: None,
            current: None,
            generation: 0,
        }
    }

    /// Use `dialer` for every service instead of the configured outbound.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Configuration the running listeners were started from.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn online(&self) -> &Arc<OnlineCounters> {
        &self.online
    }

    /// Number of listener generations started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Bound address of every running listener, by service name.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.current.as_ref().map(|g| g.bound.clone()).unwrap_or_default()
    }

    pub fn local_addr(&self, service: &str) -> Option<SocketAddr> {
        self.current
            .as_ref()
            .and_then(|g| g.bound.iter().find(|(name, _)| name == service).map(|(_, addr)| *addr))
    }

    /// Start listeners for the current configuration.
    pub async fn start(&mut self) -> Result<()> {
        self.stop().await;
        let generation = self.spawn_generation(self.config()).await?;
        self.install(generation);
        Ok(())
    }

    /// Replace the running listeners with ones built from `config`.
    ///
    /// The old listeners are released first so the new ones can take the same
    /// ports. If nothing of the new generation binds, the previous
    /// configuration is started again.
    pub async fn replace(&mut self, config: Arc<Config>) -> Result<()> {
        let previous = self.config();
        self.stop().await;
        self.online.retain_services(config.services.iter().map(|s| s.name.as_str()));

        match self.spawn_generation(config.clone()).await {
            Ok(generation) => {
                self.config.store(config);
                self.install(generation);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "new configuration could not start, restoring the previous one");
                if let Ok(generation) = self.spawn_generation(previous).await {
                    self.install(generation);
                }
                Err(e)
            }
        }
    }

    /// Cancel the accept loops and wait until their listeners are closed.
    ///
    /// Connections already accepted keep running.
    pub async fn stop(&mut self) {
        let Some(generation) = self.current.take() else {
            return;
        };
        generation.cancel.cancel();
        for handle in generation.loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
    }

    /// Stop accepting, then give open connections up to `timeout` to finish.
    ///
    /// Returns the number of connections still open.
    pub async fn shutdown(&mut self, timeout: Duration) -> usize {
        self.tracker.begin_shutdown();
        self.stop().await;
        self.tracker.wait_idle(timeout).await
    }

    fn install(&mut self, generation: Generation) {
        self.generation += 1;
        self.current = Some(generation);
    }

    async fn spawn_generation(&self, config: Arc<Config>) -> Result<Generation> {
        let cancel = CancellationToken::new();
        let mut loops = Vec::with_capacity(config.services.len());
        let mut bound = Vec::with_capacity(config.services.len());

        for service in &config.services {
            let addr = service.listen_addr();
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(service = %service.name, %addr, error = %e, "failed to bind listener");
                    continue;
                }
            };
            let local = listener.local_addr().unwrap_or(addr);
            info!(service = %service.name, listen = %local, target = %service.target(), "service started");

            let dialer = self
                .dialer
                .clone()
                .unwrap_or_else(|| build_dialer(&service.outbound, service.socket_options.as_ref()));
            let pipeline = Arc::new(Pipeline::new(
                config.clone(),
                service.clone(),
                dialer,
                self.ledger.clone(),
                self.online.get(&service.name),
            ));
            let accept = AcceptLoop {
                listener,
                pipeline,
                tracker: self.tracker.clone(),
                counts: Arc::new(ConnectionCount::default()),
                cancel: cancel.child_token(),
            };
            loops.push(tokio::spawn(accept.run()));
            bound.push((service.name.clone(), local));
        }

        if bound.is_empty() {
            return Err(ProxyError::NoListeners);
        }
        Ok(Generation { cancel, loops, bound })
    }
}

struct AcceptLoop {
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    tracker: Arc<ConnectionTracker>,
    counts: Arc<ConnectionCount>,
    cancel: CancellationToken,
}

impl AcceptLoop {
    async fn run(self) {
        let service: &ServiceConfig = self.pipeline.service();
        loop {
            let result = tokio::select! {
                res = self.listener.accept() => res,
                _ = self.cancel.cancelled() => {
                    info!(service = %service.name, "shutdown signal received, stopping accept loop");
                    break;
                }
            };
            let (stream, peer) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    let snapshot = self.counts.snapshot();
                    warn!(service = %service.name, error = %e, current = snapshot.current, total = snapshot.total, errors = snapshot.errors, "failed to accept connection");
                    continue;
                }
            };
            let guard = match self.tracker.try_accept(peer, &self.counts) {
                Ok(guard) => guard,
                Err(e) => {
                    debug!(service = %service.name, %peer, error = %e, "dropping connection");
                    continue;
                }
            };
            if let Some(opts) = &service.socket_options {
                if let Err(e) = apply_socket_options(&stream, opts) {
                    debug!(service = %service.name, %peer, error = %e, "failed to apply socket options");
                }
            }
            tokio::spawn(self.pipeline.clone().handle(stream, peer, guard));
        }
    }
}
