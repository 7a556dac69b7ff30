use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::ServiceManager;
use crate::config::load_from_path;
use crate::error::Result;

/// Default quiet period after the last file event before acting on it.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// What a reload request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadAction {
    /// Re-read the configuration file and swap listeners
    Config,
    /// Merge the quota data file into the ledger
    QuotaData,
}

/// Cloneable handle for asking the controller to reload.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<ReloadAction>,
}

impl ReloadHandle {
    /// Queue `action`; `false` when the controller is gone or busy.
    pub fn request(&self, action: ReloadAction) -> bool {
        self.tx.try_send(action).is_ok()
    }
}

/// Event loop applying configuration and quota data changes.
pub struct ReloadController {
    manager: ServiceManager,
    config_path: PathBuf,
    requests: mpsc::Receiver<ReloadAction>,
    cancel: CancellationToken,
    debounce: Duration,
    watch_files: bool,
}

impl ReloadController {
    pub fn new(manager: ServiceManager, config_path: impl Into<PathBuf>, cancel: CancellationToken) -> (Self, ReloadHandle) {
        let (tx, requests) = mpsc::channel(8);
        let controller = Self {
            manager,
            config_path: config_path.into(),
            requests,
            cancel,
            debounce: DEFAULT_DEBOUNCE,
            watch_files: true,
        };
        (controller, ReloadHandle { tx })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Only react to explicit requests.
    pub fn without_file_watch(mut self) -> Self {
        self.watch_files = false;
        self
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    /// Run until cancelled, then hand the manager back for shutdown.
    pub async fn run(mut self) -> ServiceManager {
        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
        let _watcher = if self.watch_files {
            match self.watch(fs_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "file watching unavailable, reload on request only");
                    None
                }
            }
        } else {
            None
        };

        let mut config_due: Option<Instant> = None;
        let mut data_due: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("reload controller stopping");
                    break;
                }
                Some(action) = self.requests.recv() => self.apply(action).await,
                Some(event) = fs_rx.recv() => {
                    let due = Instant::now() + self.debounce;
                    if self.touches(&event, &self.config_path) {
                        config_due = Some(due);
                    }
                    if self.touches(&event, &self.data_path()) {
                        data_due = Some(due);
                    }
                }
                _ = wait_until(config_due) => {
                    config_due = None;
                    self.apply(ReloadAction::Config).await;
                }
                _ = wait_until(data_due) => {
                    data_due = None;
                    self.apply(ReloadAction::QuotaData).await;
                }
            }
        }
        self.manager
    }

    pub async fn apply(&mut self, action: ReloadAction) {
        match action {
            ReloadAction::Config => {
                if let Err(e) = self.reload_config().await {
                    error!(error = %e, path = %self.config_path.display(), "configuration reload rejected, keeping current services");
                }
            }
            ReloadAction::QuotaData => match self.manager.ledger().reload_data().await {
                Ok(true) => info!("traffic data reloaded from disk"),
                Ok(false) => debug!("traffic data unchanged"),
                Err(e) => warn!(error = %e, "failed to reload traffic data"),
            },
        }
    }

    /// Load, validate and apply the configuration file.
    ///
    /// Nothing changes unless the whole document is valid.
    pub async fn reload_config(&mut self) -> Result<()> {
        let config = Arc::new(load_from_path(&self.config_path)?);
        if config.traffic_limiter.data_file != self.manager.config().traffic_limiter.data_file {
            warn!("traffic_limiter.data_file changes take effect after a restart");
        }
        self.manager.replace(config).await?;
        info!(
            generation = self.manager.generation(),
            services = self.manager.local_addrs().len(),
            "configuration reloaded"
        );
        Ok(())
    }

    fn data_path(&self) -> PathBuf {
        self.manager.ledger().store().path().to_path_buf()
    }

    fn touches(&self, event: &Event, path: &Path) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event.paths.iter().any(|p| p.file_name() == path.file_name())
    }

    fn watch(&self, tx: mpsc::UnboundedSender<Event>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(error = %e, "file watch error"),
        })?;

        let mut dirs = vec![parent_dir(&self.config_path)];
        if self.manager.config().traffic_limiter.enabled {
            let data_dir = parent_dir(&self.data_path());
            if !dirs.contains(&data_dir) {
                dirs.push(data_dir);
            }
        }
        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            debug!(dir = %dir.display(), "watching for changes");
        }
        Ok(watcher)
    }
}

// Editors replace files by rename, so the directory is watched instead.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
