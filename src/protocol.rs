//! Wire format shared by the server and the client.
//!
//! Client payloads are raw, unframed bytes. The server answers each read with
//! the ASCII text `ACK:<n>` and no terminator. Both sides treat a single
//! successful read as one whole message, so a payload or ack split across TCP
//! segments is not reassembled.

use std::fmt;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BACKLOG: i32 = 5;
pub const SERVER_RECV_BUFFER: usize = 4096;
pub const CLIENT_ACK_BUFFER: usize = 1024;

const ACK_PREFIX: &str = "ACK:";
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack(pub u64);

impl Ack {
    pub fn to_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let seq = text.strip_prefix(ACK_PREFIX)?;
        seq.parse().ok().map(Ack)
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ACK_PREFIX, self.0)
    }
}

/// What a received chunk looked like, for display only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(usize),
}

impl Payload {
    pub fn decode(data: &[u8]) -> Self {
        match std::str::from_utf8(data) {
            Ok(text) => Payload::Text(text.chars().take(PREVIEW_CHARS).collect()),
            Err(_) => Payload::Binary(data.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_renders_and_parses() {
        assert_eq!(Ack(7).to_bytes(), b"ACK:7".to_vec());
        assert_eq!(Ack::parse(b"ACK:42"), Some(Ack(42)));
        assert_eq!(Ack::parse(b"ACK:"), None);
        assert_eq!(Ack::parse(b"NACK:1"), None);
        assert_eq!(Ack::parse(&[0xff, 0xfe]), None);
    }

    #[test]
    fn text_payload_is_truncated_for_preview() {
        let data = "X".repeat(1024);
        match Payload::decode(data.as_bytes()) {
            Payload::Text(preview) => assert_eq!(preview.len(), 50),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn invalid_utf8_falls_back_to_binary() {
        let data = [0x58, 0xc3, 0x28, 0x00];
        assert_eq!(Payload::decode(&data), Payload::Binary(4));
    }
}
