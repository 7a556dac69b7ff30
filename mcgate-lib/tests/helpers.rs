//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcgate_lib::config::{parse_config, Config, ConfigFormat};
use mcgate_lib::outbound::{Dialer, DirectDialer};
use mcgate_lib::quota::{QuotaLedger, QuotaStore};
use mcgate_lib::service::ServiceManager;
use mcgate_lib::sniff::{encode_handshake, encode_login_start, NextState};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Upstream that echoes everything back and counts accepted connections.
pub struct EchoUpstream {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

pub async fn spawn_echo_upstream() -> io::Result<EchoUpstream> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    Ok(EchoUpstream { addr, accepted })
}

/// Direct dialer that records how often it was asked to connect.
#[derive(Debug, Default)]
pub struct CountingDialer {
    inner: DirectDialer,
    pub dials: AtomicUsize,
}

impl CountingDialer {
    pub fn count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.inner.dial(address).await
    }
}

pub fn parse(toml: &str) -> Result<Arc<Config>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(Arc::new(parse_config(toml, ConfigFormat::Toml)?))
}

pub fn memory_ledger() -> Arc<QuotaLedger> {
    Arc::new(QuotaLedger::new(QuotaStore::new(std::env::temp_dir().join("mcgate-unused.json")), 7))
}

/// Start `config` with every service dialing through `dialer`.
pub async fn start(
    config: Arc<Config>,
    ledger: Arc<QuotaLedger>,
    dialer: Arc<CountingDialer>,
) -> Result<ServiceManager, Box<dyn std::error::Error + Send + Sync>> {
    let mut manager = ServiceManager::new(config, ledger).with_dialer(dialer);
    manager.start().await?;
    Ok(manager)
}

/// Connect and send a login handshake followed by the login start.
pub async fn login(addr: SocketAddr, host: &str, player: &str) -> io::Result<(TcpStream, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut wire = encode_handshake(765, host, 25565, NextState::Login).to_vec();
    wire.extend_from_slice(&encode_login_start(player));
    stream.write_all(&wire).await?;
    Ok((stream, wire))
}

pub async fn read_varint<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<i32> {
    let mut value: i32 = 0;
    for i in 0..5 {
        let b = stream.read_u8().await?;
        value |= i32::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"))
}

/// Read one frame and return its packet id and the string field that follows.
pub async fn read_string_packet<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<(i32, String)> {
    let len = read_varint(stream).await? as usize;
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    let mut cursor = io::Cursor::new(frame);
    let id = read_varint(&mut cursor).await?;
    let str_len = read_varint(&mut cursor).await? as usize;
    let mut text = vec![0u8; str_len];
    cursor.read_exact(&mut text).await?;
    String::from_utf8(text)
        .map(|s| (id, s))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// True once the peer has closed without sending anything.
pub async fn closed_silently(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

/// Minimal TLS 1.2 record carrying a ClientHello, optionally with SNI.
pub fn client_hello(sni: Option<&str>) -> Vec<u8> {
    let mut exts = Vec::new();
    if let Some(name) = sni {
        let name = name.as_bytes();
        let mut list = vec![0x00];
        list.extend_from_slice(&(name.len() as u16).to_be_bytes());
        list.extend_from_slice(name);
        let mut ext = (list.len() as u16).to_be_bytes().to_vec();
        ext.extend_from_slice(&list);
        exts.extend_from_slice(&[0x00, 0x00]);
        exts.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        exts.extend_from_slice(&ext);
    }

    let mut hello = vec![0x03, 0x03];
    hello.extend_from_slice(&[7u8; 32]);
    hello.push(0); // session id
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    hello.extend_from_slice(&[0x01, 0x00]);
    hello.extend_from_slice(&(exts.len() as u16).to_be_bytes());
    hello.extend_from_slice(&exts);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
