use thiserror::Error;

/// Why a connection could not be sniffed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SniffError {
    #[error("connection closed before the handshake completed")]
    Eof,

    #[error("handshake exceeded {0} bytes")]
    TooLarge(usize),

    #[error("timed out waiting for the handshake")]
    Timeout,

    #[error("unrecognized protocol")]
    Unrecognized,

    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Errors that can occur in the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sniff error: {0}")]
    Sniff(#[from] SniffError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Failed to dial {target}: {source}")]
    Routing {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Traffic limit exceeded for player {0}")]
    QuotaExceeded(String),

    #[error("No listener could be opened")]
    NoListeners,
}

impl ProxyError {
    /// Short label used in connection close logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Io(_) => "io",
            ProxyError::Sniff(_) => "sniff",
            ProxyError::Config(_) => "config",
            ProxyError::AccessDenied(_) => "access_denied",
            ProxyError::CapacityExceeded(_) => "capacity",
            ProxyError::Routing { .. } => "routing",
            ProxyError::Persistence(_) => "persistence",
            ProxyError::QuotaExceeded(_) => "quota",
            ProxyError::NoListeners => "no_listeners",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
