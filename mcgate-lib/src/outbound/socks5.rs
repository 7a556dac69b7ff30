use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{apply_socket_options, Dialer};
use crate::config::SocketOptions;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// CONNECT through a SOCKS5 proxy without authentication.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: String,
    socket_options: Option<SocketOptions>,
}

impl Socks5Dialer {
    pub fn new(proxy: String, socket_options: Option<SocketOptions>) -> Self {
        Self { proxy, socket_options }
    }
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        let (host, port) = split_host_port(address)?;
        let mut stream = TcpStream::connect(&self.proxy).await?;
        if let Some(opts) = &self.socket_options {
            apply_socket_options(&stream, opts)?;
        }

        stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply != [VERSION, METHOD_NO_AUTH] {
            return Err(protocol_error("proxy refused the no-auth method"));
        }

        stream.write_all(&connect_request(host, port)?).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(protocol_error("bad reply version"));
        }
        if head[1] != 0x00 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("socks5 connect failed with code {}", head[1]),
            ));
        }
        // Skip the bound address
        let addr_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => usize::from(stream.read_u8().await?),
            _ => return Err(protocol_error("bad address type in reply")),
        };
        let mut skip = vec![0u8; addr_len + 2];
        stream.read_exact(&mut skip).await?;
        Ok(stream)
    }
}

fn connect_request(host: &str, port: u16) -> io::Result<Vec<u8>> {
    let mut req = vec![VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len()).map_err(|_| protocol_error("host name too long"))?;
            req.push(ATYP_DOMAIN);
            req.push(len);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

/// Split `host:port`, accepting bracketed IPv6 literals.
fn split_host_port(address: &str) -> io::Result<(&str, u16)> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid address: {address}"));
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = port.parse().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("socks5: {msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:25565").ok(), Some(("example.com", 25565)));
        assert_eq!(split_host_port("[::1]:80").ok(), Some(("::1", 80)));
        assert!(split_host_port("nohost").is_err());
        assert!(split_host_port(":80").is_err());
    }

    #[test]
    fn test_connect_request_encoding() -> io::Result<()> {
        assert_eq!(connect_request("10.0.0.1", 25565)?, vec![5, 1, 0, 1, 10, 0, 0, 1, 0x63, 0xdd]);
        let req = connect_request("mc.local", 80)?;
        assert_eq!(&req[..5], &[5, 1, 0, 3, 8]);
        assert_eq!(&req[5..13], b"mc.local");
        Ok(())
    }

    #[tokio::test]
    async fn test_dial_through_proxy() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let proxy = TcpListener::bind("127.0.0.1:0").await?;
        let proxy_addr = proxy.local_addr()?;

        let server = tokio::spawn(async move {
            let (mut conn, _) = proxy.accept().await?;
            let mut greeting = [0u8; 3];
            conn.read_exact(&mut greeting).await?;
            conn.write_all(&[5, 0]).await?;
            let mut head = [0u8; 5];
            conn.read_exact(&mut head).await?;
            let mut rest = vec![0u8; usize::from(head[4]) + 2];
            conn.read_exact(&mut rest).await?;
            conn.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 80]).await?;
            conn.write_all(b"hello").await?;
            Ok::<_, io::Error>((greeting, head, rest))
        });

        let dialer = Socks5Dialer::new(proxy_addr.to_string(), None);
        let mut stream = dialer.dial("backend.local:25565").await?;
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"hello");

        let (greeting, head, rest) = server.await??;
        assert_eq!(greeting, [5, 1, 0]);
        assert_eq!(head, [5, 1, 0, 3, 13]);
        assert_eq!(&rest[..13], b"backend.local");
        assert_eq!(&rest[13..], &25565u16.to_be_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_proxy_failure_code() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let proxy = TcpListener::bind("127.0.0.1:0").await?;
        let proxy_addr = proxy.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut conn, _)) = proxy.accept().await {
                let mut buf = [0u8; 64];
                let _ = conn.read(&mut buf).await;
                let _ = conn.write_all(&[5, 0]).await;
                let _ = conn.read(&mut buf).await;
                let _ = conn.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await;
            }
        });
        let dialer = Socks5Dialer::new(proxy_addr.to_string(), None);
        let err = dialer.dial("10.0.0.1:25565").await;
        assert!(err.is_err_and(|e| e.kind() == io::ErrorKind::ConnectionRefused));
        Ok(())
    }
}
