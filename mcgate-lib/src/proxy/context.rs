use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state carried through the pipeline for logging.
#[derive(Debug)]
pub struct ConnectionContext {
    pub id: String,
    pub service: Arc<str>,
    pub peer: SocketAddr,
    pub started: Instant,
    pub hostname: Option<String>,
    pub player: Option<String>,
    pub error: Option<String>,
}

impl ConnectionContext {
    pub fn new(service: Arc<str>, peer: SocketAddr) -> Self {
        let seq = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{seq:06x}"),
            service,
            peer,
            started: Instant::now(),
            hostname: None,
            player: None,
            error: None,
        }
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.id)?;
        if let Some(player) = &self.player {
            write!(f, " player={player}")?;
        }
        if let Some(host) = &self.hostname {
            write!(f, " host={host}")?;
        }
        if let Some(err) = &self.error {
            write!(f, " error={err}")?;
        }
        Ok(())
    }
}
