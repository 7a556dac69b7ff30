use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Flow;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Bytes moved by one relay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Copy bytes between `client` and `upstream` until the session ends.
///
/// There is no idle timeout: a silent session stays open until a peer closes
/// or an I/O error occurs.
pub async fn relay<A, B>(client: &mut A, upstream: &mut B, flow: Flow) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let result = match flow {
        Flow::Auto => io::copy_bidirectional(client, upstream).await.map(|(up, down)| RelayStats {
            client_to_upstream: up,
            upstream_to_client: down,
        }),
        Flow::Proxy => relay_until_first_close(client, upstream).await,
    };

    // Attempt graceful shutdown
    let _ = client.shutdown().await;
    let _ = upstream.shutdown().await;
    result
}

async fn relay_until_first_close<A, B>(client: &mut A, upstream: &mut B) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = io::split(client);
    let (mut upstream_rd, mut upstream_wr) = io::split(upstream);

    let mut stats = RelayStats::default();
    tokio::select! {
        res = copy_counting(&mut client_rd, &mut upstream_wr) => {
            stats.client_to_upstream = res?;
        }
        res = copy_counting(&mut upstream_rd, &mut client_wr) => {
            stats.upstream_to_client = res?;
        }
    }
    Ok(stats)
}

async fn copy_counting<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total = total.saturating_add(n as u64);
    }
}
