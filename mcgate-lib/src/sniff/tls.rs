//! Server name extraction from a TLS ClientHello.
//!
//! Only the first record is inspected; ClientHellos fragmented over several
//! records are reported as unrecognized.

use super::SniffOutcome;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;

/// Inspect a byte prefix for a TLS ClientHello.
///
/// Yields `NotEnoughData` while the first record is incomplete and
/// `Unrecognized` for anything that is not a well-formed ClientHello.
pub fn sniff_tls(buf: &[u8]) -> SniffOutcome {
    if buf.is_empty() {
        return SniffOutcome::NotEnoughData;
    }
    if buf[0] != CONTENT_TYPE_HANDSHAKE {
        return SniffOutcome::Unrecognized;
    }
    if buf.len() < RECORD_HEADER_LEN {
        // Major version is known before the header is complete
        if buf.len() >= 2 && buf[1] != 0x03 {
            return SniffOutcome::Unrecognized;
        }
        return SniffOutcome::NotEnoughData;
    }
    if buf[1] != 0x03 {
        return SniffOutcome::Unrecognized;
    }
    let record_len = usize::from(u16::from_be_bytes([buf[3], buf[4]]));
    let consumed = RECORD_HEADER_LEN + record_len;
    if record_len == 0 {
        return SniffOutcome::Unrecognized;
    }
    if buf.len() < consumed {
        return SniffOutcome::NotEnoughData;
    }

    match parse_client_hello(&buf[RECORD_HEADER_LEN..consumed]) {
        Some(sni) => SniffOutcome::TlsClientHello { sni, consumed },
        None => SniffOutcome::Unrecognized,
    }
}

/// Cursor over a handshake fragment; every read is bounds-checked.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        let bytes = self.take(3)?;
        Some((usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2]))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn skip_u8_prefixed(&mut self) -> Option<()> {
        let n = self.u8()?;
        self.take(usize::from(n)).map(|_| ())
    }

    fn skip_u16_prefixed(&mut self) -> Option<()> {
        let n = self.u16()?;
        self.take(usize::from(n)).map(|_| ())
    }
}

/// Returns `None` when malformed, `Some(None)` when there is no SNI.
fn parse_client_hello(fragment: &[u8]) -> Option<Option<String>> {
    let mut r = Reader::new(fragment);
    if r.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    let hello_len = r.u24()?;
    let hello = r.take(hello_len)?;

    let mut r = Reader::new(hello);
    // client_version + random
    r.take(2 + 32)?;
    r.skip_u8_prefixed()?; // session id
    r.skip_u16_prefixed()?; // cipher suites
    r.skip_u8_prefixed()?; // compression methods

    if r.pos == hello.len() {
        // Extensions are optional
        return Some(None);
    }
    let ext_len = usize::from(r.u16()?);
    let mut exts = Reader::new(r.take(ext_len)?);
    while exts.pos < ext_len {
        let ext_type = exts.u16()?;
        let len = usize::from(exts.u16()?);
        let body = exts.take(len)?;
        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(body).map(Some);
        }
    }
    Some(None)
}

fn parse_server_name(body: &[u8]) -> Option<String> {
    let mut r = Reader::new(body);
    let list_len = usize::from(r.u16()?);
    let mut list = Reader::new(r.take(list_len)?);
    while list.pos < list_len {
        let name_type = list.u8()?;
        let len = usize::from(list.u16()?);
        let name = list.take(len)?;
        if name_type == NAME_TYPE_HOST {
            let host = std::str::from_utf8(name).ok()?;
            return Some(host.trim_end_matches('.').to_ascii_lowercase());
        }
    }
    None
}
