//! Locally answered server-list pings.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::chat::ChatMessage;
use crate::config::PlayerSample;
use crate::error::{ProxyError, SniffError};
use crate::sniff::read_frame;
use crate::sniff::varint::{frame, write_string, write_varint};

const PACKET_STATUS_REQUEST: i32 = 0x00;
const PACKET_PING: i32 = 0x01;

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub version: StatusVersion,
    pub players: StatusPlayers,
    pub description: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPlayers {
    pub max: i32,
    pub online: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<SampleEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleEntry {
    pub name: String,
    pub id: String,
}

impl From<&PlayerSample> for SampleEntry {
    fn from(p: &PlayerSample) -> Self {
        Self { name: p.name.clone(), id: p.id.clone() }
    }
}

impl StatusResponse {
    pub fn encode(&self) -> BytesMut {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        let mut payload = BytesMut::with_capacity(json.len() + 8);
        write_varint(PACKET_STATUS_REQUEST, &mut payload);
        write_string(&json, &mut payload);
        frame(&payload)
    }
}

/// Answer a status exchange on `stream`.
///
/// `pending` holds bytes the client already sent after its handshake. The
/// status request is answered with `response`, the ping is echoed back, then
/// the exchange ends.
pub async fn serve_status<S>(
    stream: &mut S,
    mut pending: BytesMut,
    response: &StatusResponse,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut answered = false;
    loop {
        match read_frame(&pending)? {
            Some(f) if f.packet_id == PACKET_STATUS_REQUEST && !answered => {
                stream.write_all(&response.encode()).await?;
                answered = true;
                pending.advance(f.end);
            }
            Some(f) if f.packet_id == PACKET_PING => {
                // Pong is the ping frame verbatim
                stream.write_all(&pending[..f.end]).await?;
                stream.flush().await?;
                return Ok(());
            }
            Some(_) => return Err(SniffError::Malformed("unexpected status packet").into()),
            None => {
                pending.reserve(256);
                if stream.read_buf(&mut pending).await? == 0 {
                    // Clients may close right after reading the response
                    return if answered { Ok(()) } else { Err(SniffError::Eof.into()) };
                }
            }
        }
    }
}
