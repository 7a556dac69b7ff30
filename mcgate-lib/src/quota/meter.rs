use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::info;

use super::{QuotaLedger, MIB};
use crate::error::ProxyError;

/// Stream decorator charging every transferred byte to a player.
///
/// After each successful read or write the usage is recorded and the limit
/// re-checked; once over the limit the call that crossed it fails and every
/// later read or write fails too. At most one buffer overshoots the limit.
pub struct MeteredStream<S> {
    inner: S,
    ledger: Arc<QuotaLedger>,
    player: Arc<str>,
    default_limit_mb: i64,
    read_bytes: u64,
    write_bytes: u64,
    started: Instant,
    exceeded: bool,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, ledger: Arc<QuotaLedger>, player: impl Into<Arc<str>>, default_limit_mb: i64) -> Self {
        Self {
            inner,
            ledger,
            player: player.into(),
            default_limit_mb,
            read_bytes: 0,
            write_bytes: 0,
            started: Instant::now(),
            exceeded: false,
        }
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_bytes
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    fn total(&self) -> u64 {
        self.read_bytes + self.write_bytes
    }

    /// Charge `n` bytes; `false` once the player is over the limit.
    fn account(&mut self, n: usize) -> bool {
        let n64 = n as u64;
        self.ledger.consume(&self.player, n as i64);
        if !self.ledger.can_consume(&self.player, 0, self.default_limit_mb) {
            self.exceeded = true;
            info!(player = %self.player, total = self.total(), "traffic limit reached, closing session");
            return false;
        }
        let total = self.total();
        if total % (MIB as u64) < n64 {
            info!(
                player = %self.player,
                read = self.read_bytes,
                write = self.write_bytes,
                total,
                "traffic update"
            );
        }
        true
    }

    fn quota_error(&self) -> io::Error {
        quota_exceeded(&self.player)
    }
}

/// The error surfaced by a metered stream over its limit.
pub fn quota_exceeded(player: &str) -> io::Error {
    io::Error::other(ProxyError::QuotaExceeded(player.to_string()))
}

/// Whether an I/O error was produced by a metered stream over its limit.
pub fn is_quota_exceeded(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<ProxyError>())
        .is_some_and(|e| matches!(e, ProxyError::QuotaExceeded(_)))
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.exceeded {
            return Poll::Ready(Err(this.quota_error()));
        }
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 {
                    this.read_bytes += n as u64;
                    if !this.account(n) {
                        // Hand nothing of the breaching read to the caller
                        buf.set_filled(before);
                        return Poll::Ready(Err(this.quota_error()));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.exceeded {
            return Poll::Ready(Err(this.quota_error()));
        }
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) if n > 0 => {
                this.write_bytes += n as u64;
                if this.account(n) {
                    Poll::Ready(Ok(n))
                } else {
                    Poll::Ready(Err(this.quota_error()))
                }
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        info!(
            player = %self.player,
            read = self.read_bytes,
            write = self.write_bytes,
            total = self.total(),
            duration = ?self.started.elapsed(),
            "session ended"
        );
    }
}
