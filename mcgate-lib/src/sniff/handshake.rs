//! Game (Minecraft Java) handshake and login-start parsing.

use bytes::{BufMut, BytesMut};

use super::varint::{frame, read_string, read_varint, write_string, write_varint};
use super::{SniffOutcome, MAX_SNIFF_BYTES};
use crate::error::SniffError;

const PACKET_HANDSHAKE: i32 = 0x00;
const PACKET_LOGIN_START: i32 = 0x00;

/// Longest hostname a vanilla client sends (plus room for Forge markers).
const MAX_HOSTNAME_LEN: usize = 255 * 4 + 32;

/// State requested by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status,
    Login,
    /// 1.20.5+ transfer; handled exactly like `Login`
    Transfer,
}

impl NextState {
    fn from_wire(v: i32) -> Option<Self> {
        match v {
            1 => Some(NextState::Status),
            2 => Some(NextState::Login),
            3 => Some(NextState::Transfer),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            NextState::Status => 1,
            NextState::Login => 2,
            NextState::Transfer => 3,
        }
    }

    pub fn is_login(self) -> bool {
        matches!(self, NextState::Login | NextState::Transfer)
    }
}

/// A parsed handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    /// Hostname with any Forge marker removed when stripping was requested
    pub hostname: String,
    pub port: u16,
    pub next_state: NextState,
    /// The `\0...` tail removed from the hostname, re-appended on encode
    pub stripped_suffix: Option<String>,
    /// Length of the whole frame, length prefix included
    pub consumed: usize,
}

impl Handshake {
    /// Encode the handshake, optionally with another hostname.
    ///
    /// A stripped Forge marker is appended again so the upstream still sees
    /// a modded client.
    pub fn encode(&self, hostname: Option<&str>) -> BytesMut {
        let mut host = hostname.unwrap_or(&self.hostname).to_string();
        if let Some(suffix) = &self.stripped_suffix {
            host.push_str(suffix);
        }
        encode_handshake(self.protocol_version, &host, self.port, self.next_state)
    }
}

pub fn encode_handshake(protocol_version: i32, hostname: &str, port: u16, next_state: NextState) -> BytesMut {
    let mut payload = BytesMut::with_capacity(hostname.len() + 16);
    write_varint(PACKET_HANDSHAKE, &mut payload);
    write_varint(protocol_version, &mut payload);
    write_string(hostname, &mut payload);
    payload.put_u16(port);
    write_varint(next_state.to_wire(), &mut payload);
    frame(&payload)
}

pub fn encode_login_start(player_name: &str) -> BytesMut {
    let mut payload = BytesMut::with_capacity(player_name.len() + 2);
    write_varint(PACKET_LOGIN_START, &mut payload);
    write_string(player_name, &mut payload);
    frame(&payload)
}

/// One length-prefixed packet inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub packet_id: i32,
    /// Payload after the packet id
    pub body_start: usize,
    /// End of the frame (== bytes consumed)
    pub end: usize,
}

/// Locate the next complete frame.
///
/// `Ok(None)` means more bytes are needed.
pub fn read_frame(buf: &[u8]) -> Result<Option<Frame>, SniffError> {
    let Some((len, n)) = read_varint(buf, 0)? else {
        return Ok(None);
    };
    let len = usize::try_from(len).map_err(|_| SniffError::Malformed("negative frame length"))?;
    if len == 0 {
        return Err(SniffError::Malformed("empty frame"));
    }
    if len > MAX_SNIFF_BYTES {
        return Err(SniffError::TooLarge(MAX_SNIFF_BYTES));
    }
    let end = n + len;
    if buf.len() < end {
        return Ok(None);
    }
    let (packet_id, id_len) =
        read_varint(&buf[..end], n)?.ok_or(SniffError::Malformed("truncated packet id"))?;
    Ok(Some(Frame { packet_id, body_start: n + id_len, end }))
}

/// Inspect a byte prefix for a handshake packet.
pub fn sniff_game_handshake(buf: &[u8], strip_fml: bool) -> SniffOutcome {
    match parse_handshake(buf, strip_fml) {
        Ok(Some(hs)) => SniffOutcome::GameHandshake(hs),
        Ok(None) => SniffOutcome::NotEnoughData,
        Err(_) => SniffOutcome::Unrecognized,
    }
}

pub fn parse_handshake(buf: &[u8], strip_fml: bool) -> Result<Option<Handshake>, SniffError> {
    // Reject early on the packet id instead of waiting for a whole bogus frame
    if let Some((_, n)) = read_varint(buf, 0)? {
        if buf.get(n).is_some_and(|id| i32::from(*id) != PACKET_HANDSHAKE) {
            return Err(SniffError::Malformed("not a handshake packet"));
        }
    }
    let Some(frame) = read_frame(buf)? else {
        return Ok(None);
    };
    if frame.packet_id != PACKET_HANDSHAKE {
        return Err(SniffError::Malformed("not a handshake packet"));
    }
    let end = frame.end;
    let mut pos = frame.body_start;

    let (protocol_version, n) =
        read_varint(&buf[..end], pos)?.ok_or(SniffError::Malformed("truncated protocol version"))?;
    pos += n;

    let (raw_host, n) = read_string(buf, pos, end)?;
    if raw_host.len() > MAX_HOSTNAME_LEN {
        return Err(SniffError::Malformed("hostname too long"));
    }
    pos += n;

    let port_bytes = buf
        .get(pos..pos + 2)
        .filter(|_| pos + 2 <= end)
        .ok_or(SniffError::Malformed("truncated port"))?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    pos += 2;

    let (state, n) =
        read_varint(&buf[..end], pos)?.ok_or(SniffError::Malformed("truncated next state"))?;
    pos += n;
    let next_state = NextState::from_wire(state).ok_or(SniffError::Malformed("unknown next state"))?;
    if pos != end {
        return Err(SniffError::Malformed("trailing bytes in handshake"));
    }

    let (hostname, stripped_suffix) = if strip_fml {
        split_fml_suffix(&raw_host)
    } else {
        (raw_host, None)
    };

    Ok(Some(Handshake { protocol_version, hostname, port, next_state, stripped_suffix, consumed: end }))
}

/// Split a Forge marker (`\0FML\0`, `\0FML2\0`, ...) or any other `\0` tail off a hostname.
fn split_fml_suffix(raw: &str) -> (String, Option<String>) {
    match raw.find('\0') {
        Some(idx) => (raw[..idx].to_string(), Some(raw[idx..].to_string())),
        None => (raw.to_string(), None),
    }
}

/// Inspect a byte prefix for the login start packet that follows a login handshake.
pub fn sniff_login_start(buf: &[u8]) -> SniffOutcome {
    match parse_login_start(buf) {
        Ok(Some((player_name, consumed))) => SniffOutcome::GameLoginStart { player_name, consumed },
        Ok(None) => SniffOutcome::NotEnoughData,
        Err(_) => SniffOutcome::Unrecognized,
    }
}

pub fn parse_login_start(buf: &[u8]) -> Result<Option<(String, usize)>, SniffError> {
    let Some(frame) = read_frame(buf)? else {
        return Ok(None);
    };
    if frame.packet_id != PACKET_LOGIN_START {
        return Err(SniffError::Malformed("not a login start packet"));
    }
    // Newer protocol versions append a UUID; only the name is needed
    let (name, _) = read_string(buf, frame.body_start, frame.end)?;
    if name.is_empty() || name.chars().count() > 16 {
        return Err(SniffError::Malformed("invalid player name"));
    }
    Ok(Some((name, frame.end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTOCOL_1_20_4: i32 = 765;

    fn handshake(host: &str, state: NextState) -> BytesMut {
        encode_handshake(PROTOCOL_1_20_4, host, 25565, state)
    }

    #[test]
    fn test_parse_login_handshake() {
        let bytes = handshake("play.example.com", NextState::Login);
        let SniffOutcome::GameHandshake(hs) = sniff_game_handshake(&bytes, false) else {
            panic!("expected handshake");
        };
        assert_eq!(hs.hostname, "play.example.com");
        assert_eq!(hs.protocol_version, PROTOCOL_1_20_4);
        assert_eq!(hs.port, 25565);
        assert_eq!(hs.next_state, NextState::Login);
        assert_eq!(hs.stripped_suffix, None);
        assert_eq!(hs.consumed, bytes.len());
    }

    #[test]
    fn test_every_prefix_needs_more_data() {
        let bytes = handshake("play.example.com", NextState::Status);
        for cut in 0..bytes.len() {
            assert_eq!(sniff_game_handshake(&bytes[..cut], false), SniffOutcome::NotEnoughData);
        }
    }

    #[test]
    fn test_transfer_counts_as_login() {
        let bytes = handshake("a", NextState::Transfer);
        let hs = parse_handshake(&bytes, false).ok().flatten();
        assert!(hs.is_some_and(|hs| hs.next_state.is_login()));
    }

    #[test]
    fn test_fml_suffix_stripped_and_restored() {
        for marker in ["\0FML\0", "\0FML2\0", "\0FML3\0", "\0other"] {
            let raw = format!("play.example.com{marker}");
            let bytes = handshake(&raw, NextState::Login);
            let hs = parse_handshake(&bytes, true).ok().flatten();
            let Some(hs) = hs else { panic!("expected handshake for {marker:?}") };
            assert_eq!(hs.hostname, "play.example.com");
            assert_eq!(hs.stripped_suffix.as_deref(), Some(marker));

            let rewritten = hs.encode(Some("backend.local"));
            let again = parse_handshake(&rewritten, false).ok().flatten();
            assert_eq!(again.map(|h| h.hostname), Some(format!("backend.local{marker}")));
        }
    }

    #[test]
    fn test_suffix_kept_without_stripping() {
        let bytes = handshake("host\0FML\0", NextState::Login);
        let hs = parse_handshake(&bytes, false).ok().flatten();
        assert_eq!(hs.map(|h| h.hostname), Some("host\0FML\0".to_string()));
    }

    #[test]
    fn test_reencoding_is_stable() {
        let bytes = handshake("play.example.com\0FML2\0", NextState::Login);
        let first = parse_handshake(&bytes, true).ok().flatten();
        let Some(first) = first else { panic!("expected handshake") };
        let encoded = first.encode(None);
        assert_eq!(&encoded[..], &bytes[..]);
        let second = parse_handshake(&encoded, true).ok().flatten();
        assert_eq!(second, Some(first));
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(sniff_game_handshake(b"GET / HTTP/1.1\r\n\r\n", false), SniffOutcome::Unrecognized);
        // status request frame is not a handshake
        assert_eq!(sniff_game_handshake(&[0x01, 0x00], false), SniffOutcome::Unrecognized);
        // unknown next state
        let mut bad = BytesMut::new();
        write_varint(0, &mut bad);
        write_varint(47, &mut bad);
        write_string("a", &mut bad);
        bad.put_u16(25565);
        write_varint(9, &mut bad);
        assert_eq!(sniff_game_handshake(&frame(&bad), false), SniffOutcome::Unrecognized);
    }

    #[test]
    fn test_login_start() {
        let mut bytes = encode_login_start("Notch");
        // UUID appended by 1.19+ clients
        bytes.put_slice(&[0u8; 16]);
        let mut framed = frame(&bytes[1..]);
        framed.put_slice(b"trailing");
        let outcome = sniff_login_start(&framed);
        assert_eq!(
            outcome,
            SniffOutcome::GameLoginStart { player_name: "Notch".to_string(), consumed: framed.len() - 8 }
        );
    }

    #[test]
    fn test_login_start_rejects_long_names() {
        let bytes = encode_login_start("ThisNameIsWayTooLong");
        assert_eq!(sniff_login_start(&bytes), SniffOutcome::Unrecognized);
    }
}
