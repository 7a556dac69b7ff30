//! Stateless protocol sniffers over a byte prefix, plus the read loop that
//! feeds them from a client stream.

pub mod handshake;
pub mod tls;
pub mod varint;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProxyError, SniffError};

pub use handshake::{
    encode_handshake, encode_login_start, read_frame, sniff_game_handshake, sniff_login_start,
    Frame, Handshake, NextState,
};
pub use tls::sniff_tls;

/// Upper bound on bytes buffered while sniffing.
pub const MAX_SNIFF_BYTES: usize = 64 * 1024;

/// What a byte prefix looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffOutcome {
    NotEnoughData,
    TlsClientHello { sni: Option<String>, consumed: usize },
    GameHandshake(Handshake),
    GameLoginStart { player_name: String, consumed: usize },
    Unrecognized,
}

/// Read from `stream` into `buf` until `parse` recognizes (or rejects) the
/// prefix starting at `offset`.
///
/// Every byte read stays in `buf` so the caller can replay it upstream.
pub async fn read_until<R, F>(
    stream: &mut R,
    buf: &mut BytesMut,
    offset: usize,
    mut parse: F,
) -> Result<SniffOutcome, ProxyError>
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]) -> SniffOutcome,
{
    loop {
        if buf.len() > offset {
            match parse(&buf[offset..]) {
                SniffOutcome::NotEnoughData => {}
                outcome => return Ok(outcome),
            }
        }
        if buf.len() >= MAX_SNIFF_BYTES {
            return Err(SniffError::TooLarge(MAX_SNIFF_BYTES).into());
        }
        buf.reserve(4096);
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(SniffError::Eof.into());
        }
    }
}
