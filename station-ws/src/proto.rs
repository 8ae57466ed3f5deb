//! RFC 6455 subset: client, masked, no extensions, no fragmentation. Frame
//! encode/decode plus the handshake key hashing, narrowed from a general
//! fragmentable client-or-server codec to exactly what a station needs.

use base64::Engine;
use rand::Rng;
use sha1::{Digest, Sha1};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The fixed client mask `01 01 01 01`: masking degenerates to inverting the
/// low bit of every payload byte.
pub const MASK: [u8; 4] = [0x01, 0x01, 0x01, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// `FIN=0` (fragmentation), nonzero `RSV`, or a masked frame from the
    /// server — all protocol violations for this subset.
    InvalidHeader,
    /// A 64-bit extended length, which this subset never sends or accepts.
    LengthTooLarge,
    UnknownOpcode,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {}

/// Base64(SHA1(key + GUID)), computed both to fill `Sec-WebSocket-Key` with a
/// fresh nonce and to verify the server's `Sec-WebSocket-Accept`.
pub fn accept_hash(key_b64: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key_b64.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// A random 16-byte nonce, base64-encoded, for `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// A decoded frame header: opcode, payload length, and how many bytes the
/// header itself occupied.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub opcode: OpCode,
    pub payload_len: usize,
    pub header_len: usize,
}

/// Parse an incoming (server, unmasked) frame header from `window`. Returns
/// `Ok(None)` if the header hasn't fully arrived yet.
pub fn decode_header(window: &[u8]) -> Result<Option<Header>, Error> {
    if window.len() < 2 {
        return Ok(None);
    }
    let b0 = window[0];
    let b1 = window[1];

    let fin = b0 & 0x80 != 0;
    let rsv = b0 & 0x70;
    let masked = b1 & 0x80 != 0;
    if !fin || rsv != 0 || masked {
        return Err(Error::InvalidHeader);
    }

    let opcode = OpCode::from_byte(b0 & 0x0F).ok_or(Error::UnknownOpcode)?;
    let len_field = b1 & 0x7F;

    let (payload_len, header_len) = match len_field {
        126 => {
            if window.len() < 4 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([window[2], window[3]]) as usize;
            (len, 4)
        }
        127 => return Err(Error::LengthTooLarge),
        n => (n as usize, 2),
    };

    Ok(Some(Header {
        opcode,
        payload_len,
        header_len,
    }))
}

/// Encode a client-masked frame: `FIN=1`, fixed mask `01 01 01 01`, short (2
/// + 4 mask bytes) or medium (2 + 2 extended-length + 4 mask bytes) header
/// depending on payload size. Never produces a 64-bit length frame.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.push(0x80 | opcode.as_byte());

    if payload.len() < 126 {
        out.push(0x80 | payload.len() as u8);
    } else {
        out.push(0x80 | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(&MASK);
    out.extend(payload.iter().map(|b| b ^ 0x01));
    out
}

/// Encode a CLOSE frame carrying a big-endian reason code, per `ws_close`.
pub fn encode_close(reason: u16) -> Vec<u8> {
    encode_frame(OpCode::Close, &reason.to_be_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ping_frame_roundtrips_per_spec_scenario() {
        // spec.md §8 scenario 5: peer PING "abc" -> we reply PONG, masked,
        // mask-XOR is invert-low-bit.
        let frame = encode_frame(OpCode::Pong, b"abc");
        assert_eq!(frame[0], 0x8A); // FIN | PONG
        assert_eq!(frame[1], 0x80 | 3); // MASK | len=3
        assert_eq!(&frame[2..6], &MASK);
        assert_eq!(&frame[6..9], &[b'a' ^ 1, b'b' ^ 1, b'c' ^ 1]);
    }

    #[test]
    fn decode_rejects_masked_server_frame() {
        let window = [0x81u8, 0x80, 0, 0, 0, 0];
        assert!(decode_header(&window).is_err());
    }

    #[test]
    fn decode_rejects_fragmentation() {
        let window = [0x01u8, 0x03];
        assert!(decode_header(&window).is_err());
    }

    #[test]
    fn decode_rejects_64bit_length() {
        let window = [0x82u8, 0x7F];
        assert!(decode_header(&window).is_err());
    }

    #[test]
    fn decode_short_header_waits_for_more_bytes() {
        let window = [0x81u8];
        assert!(decode_header(&window).unwrap().is_none());
    }

    #[test]
    fn decode_medium_header() {
        let window = [0x82u8, 126, 0x01, 0x00];
        let header = decode_header(&window).unwrap().unwrap();
        assert_eq!(header.payload_len, 256);
        assert_eq!(header.header_len, 4);
    }

    #[test]
    fn accept_hash_matches_rfc6455_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_hash("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
