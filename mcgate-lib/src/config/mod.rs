mod lists;
mod loader;
mod root;
mod security;
mod service;
mod logging;
mod timeout;
mod traffic;
pub mod validator;

pub use lists::{NamedList, NamedLists};
pub use loader::{load_from_path, parse_config, ConfigFormat};
pub use root::{Config, Settings};
pub use security::{AccessMode, AccessPolicy, TlsSniffPolicy};
pub use service::{
    join_host_port, AnyDestConfig, Flow, MinecraftPolicy, OnlineCountConfig, OutboundConfig,
    PingMode, PlayerSample, ServiceConfig, SocketOptions,
};
pub use logging::LoggingConfig;
pub use timeout::TimeoutConfig;
pub use traffic::TrafficLimiterConfig;
