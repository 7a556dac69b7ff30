use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::security::{AccessPolicy, TlsSniffPolicy};

/// One proxied route: a listen port relayed to a single upstream target
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unique service name, used in logs and kick messages
    pub name: String,
    /// Port to listen on
    /// Use 0 to let the OS pick a port (tests)
    pub listen: u16,
    /// Address to bind the listener to
    /// Default: "0.0.0.0"
    #[serde(default = "default_listen_host")]
    pub listen_host: IpAddr,
    /// Upstream host name or IP address
    /// May be empty when `minecraft.any_dest` is configured
    #[serde(default)]
    pub target_address: String,
    /// Upstream port
    pub target_port: u16,
    /// Relay mode once the handshake has been forwarded
    /// Default: "auto"
    #[serde(default)]
    pub flow: Flow,
    /// Access policy applied to the peer IP address
    /// Default: disabled
    #[serde(default)]
    pub ip_access: AccessPolicy,
    /// TLS ClientHello inspection (optional)
    /// Default: None (no TLS sniffing)
    #[serde(default)]
    pub tls_sniffing: Option<TlsSniffPolicy>,
    /// Game handshake inspection and policies (optional)
    /// Default: None (no game protocol handling)
    #[serde(default)]
    pub minecraft: Option<MinecraftPolicy>,
    /// Outbound transport used to reach the upstream
    /// Default: direct
    #[serde(default)]
    pub outbound: OutboundConfig,
    /// Raw socket tuning applied to accepted and outbound sockets (optional)
    #[serde(default)]
    pub socket_options: Option<SocketOptions>,
}

impl ServiceConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.listen)
    }

    pub fn target(&self) -> String {
        join_host_port(&self.target_address, self.target_port)
    }
}

/// Format `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Relay mode
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Full-duplex copy with half-close propagation
    #[default]
    Auto,
    /// The session ends as soon as either direction finishes
    Proxy,
}

/// Game protocol (Minecraft Java) policy
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MinecraftPolicy {
    /// Replace the handshake hostname with this value before forwarding
    /// Default: None (hostname forwarded as sent)
    #[serde(default)]
    pub rewritten_hostname: Option<String>,
    /// Access policy applied to the handshake hostname (case-insensitive)
    #[serde(default)]
    pub hostname_access: AccessPolicy,
    /// Access policy applied to the player name (exact match)
    #[serde(default)]
    pub name_access: AccessPolicy,
    /// Strip the Forge marker (`\0FML\0`, `\0FML2\0`, ...) from the hostname
    /// before policy checks
    /// Default: false
    #[serde(default)]
    pub ignore_fml_suffix: bool,
    /// Concurrent player cap
    #[serde(default)]
    pub online_count: OnlineCountConfig,
    /// Wildcard routing: `<host>.<root>` is relayed to `<host>` (optional)
    #[serde(default)]
    pub any_dest: Option<AnyDestConfig>,
    /// How status (server list ping) requests are answered
    /// Default: "forward"
    #[serde(default)]
    pub ping_mode: PingMode,
    /// MOTD shown by `ping_mode = "fake"`
    #[serde(default)]
    pub motd_description: String,
    /// Server icon shown by `ping_mode = "fake"`, as a `data:image/png;base64,` URI
    #[serde(default)]
    pub motd_favicon: Option<String>,
}

/// Concurrent player cap
#[derive(Debug, Deserialize, Clone)]
pub struct OnlineCountConfig {
    /// Maximum number of concurrent players
    /// Default: 20
    #[serde(default = "default_max_players")]
    pub max: i32,
    /// Reject logins once `max` players are connected
    /// Default: false (the value is only advertised)
    #[serde(default)]
    pub enable_max_limit: bool,
    /// Player sample advertised by `ping_mode = "fake"`
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

impl Default for OnlineCountConfig {
    fn default() -> Self {
        Self { max: default_max_players(), enable_max_limit: false, sample: Vec::new() }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnyDestConfig {
    /// Root domain under which every subdomain is accepted
    /// Example: "proxy.example.com"
    pub wildcard_root_domain: String,
}

/// Status request handling
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PingMode {
    /// Relay the status request to the upstream
    #[default]
    Forward,
    /// Close status connections without answering
    Disconnect,
    /// Answer locally with the configured MOTD and live player count
    Fake,
}

/// Outbound transport
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundConfig {
    /// Connect to the upstream directly
    #[default]
    Direct,
    /// Connect through a SOCKS5 proxy (no authentication)
    Socks5 {
        /// Proxy address, `host:port`
        address: String,
    },
}

/// Raw socket tuning
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Set TCP_NODELAY
    #[serde(default)]
    pub tcp_nodelay: Option<bool>,
    /// Enable TCP keepalive with this idle time in seconds
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
    /// SO_SNDBUF in bytes
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
    /// SO_RCVBUF in bytes
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
}

fn default_listen_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_max_players() -> i32 {
    20
}
