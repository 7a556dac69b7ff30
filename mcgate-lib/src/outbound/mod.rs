//! Outbound transports used to reach the upstream.

mod socks5;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{OutboundConfig, SocketOptions};

pub use socks5::Socks5Dialer;

/// Opens the upstream connection for a session.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connect to `address` (`host:port`).
    async fn dial(&self, address: &str) -> io::Result<TcpStream>;
}

/// Plain TCP connect.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    socket_options: Option<SocketOptions>,
}

impl DirectDialer {
    pub fn new(socket_options: Option<SocketOptions>) -> Self {
        Self { socket_options }
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address).await?;
        if let Some(opts) = &self.socket_options {
            apply_socket_options(&stream, opts)?;
        }
        Ok(stream)
    }
}

/// Build the dialer selected by a service's `outbound` section.
pub fn build_dialer(outbound: &OutboundConfig, socket_options: Option<&SocketOptions>) -> Arc<dyn Dialer> {
    match outbound {
        OutboundConfig::Direct => Arc::new(DirectDialer::new(socket_options.cloned())),
        OutboundConfig::Socks5 { address } => {
            Arc::new(Socks5Dialer::new(address.clone(), socket_options.cloned()))
        }
    }
}

/// Apply raw socket tuning to a connected stream.
pub fn apply_socket_options(stream: &TcpStream, opts: &SocketOptions) -> io::Result<()> {
    if let Some(nodelay) = opts.tcp_nodelay {
        stream.set_nodelay(nodelay)?;
    }
    let sock = SockRef::from(stream);
    if let Some(secs) = opts.keepalive_secs {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(secs));
        sock.set_tcp_keepalive(&keepalive)?;
    }
    if let Some(size) = opts.send_buffer_size {
        sock.set_send_buffer_size(size)?;
    }
    if let Some(size) = opts.recv_buffer_size {
        sock.set_recv_buffer_size(size)?;
    }
    debug!(?opts, "applied socket options");
    Ok(())
}
