#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod outbound;
pub mod protocol;
pub mod proxy;
pub mod quota;
pub mod security;
pub mod service;
pub mod sniff;
pub mod telemetry;

pub use config::{load_from_path, Config, ServiceConfig};
pub use error::{ProxyError, Result, SniffError};
pub use outbound::{build_dialer, Dialer, DirectDialer, Socks5Dialer};
pub use proxy::Pipeline;
pub use quota::{MeteredStream, QuotaLedger, QuotaStore};
pub use service::{ReloadAction, ReloadController, ReloadHandle, ServiceManager};
