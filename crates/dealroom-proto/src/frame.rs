//! STOMP 1.2 frame codec.
//!
//! A frame on the wire is
//!
//! ```text
//! COMMAND EOL
//! *(name ":" value EOL)
//! EOL
//! body NUL *(EOL)
//! ```
//!
//! where EOL is `\n` optionally preceded by `\r`. A packet consisting only of
//! EOLs is a heartbeat. Header names and values are escaped (`\\`, `\n`, `\r`,
//! `\c`) for every command except `CONNECT`, `STOMP` and `CONNECTED`.
//!
//! # Invariants
//!
//! - The encoder always derives `content-length` from the body. A caller
//!   supplied `content-length` header is ignored, so the declared and actual
//!   body length can never disagree.
//! - Duplicate headers are preserved in order; lookups return the first
//!   occurrence as STOMP 1.2 requires.

use std::fmt;

use bytes::{BufMut, Bytes};
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (STOMP 1.2 alias of `CONNECT`).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Publish to a destination.
    Send,
    /// Register interest in a destination.
    Subscribe,
    /// Remove a subscription.
    Unsubscribe,
    /// Acknowledge a message.
    Ack,
    /// Reject a message.
    Nack,
    /// Start a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Abort a transaction.
    Abort,
    /// Graceful client shutdown.
    Disconnect,
    /// Server delivery for a subscription.
    Message,
    /// Server receipt for a client frame.
    Receipt,
    /// Server error; the server closes the connection afterwards.
    Error,
}

impl Command {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line. `None` for unknown commands.
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    /// Handshake frames carry raw header values.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded transport packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Bare EOL keepalive.
    Heartbeat,
    /// Complete frame.
    Frame(Frame),
}

/// STOMP frame: command, ordered headers and an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    headers: Vec<(String, String)>,
    /// Raw body bytes (JSON for every frame this client produces).
    pub body: Bytes,
}

impl Frame {
    /// Upper bound on an encoded frame, in bytes.
    pub const MAX_FRAME_SIZE: usize = 1 << 20;

    /// Encoded heartbeat.
    pub const HEARTBEAT: &'static [u8] = b"\n";

    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: Bytes::new() }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body and set `content-type`.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.with_header("content-type", "application/json").with_body(body))
    }

    /// First value for `name`. `None` if the header is absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// All headers in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the encoded frame exceeds
    ///   [`Frame::MAX_FRAME_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let encoded = self.to_vec()?;
        dst.put_slice(&encoded);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let escape = self.command.escapes_headers();
        let mut buf = Vec::with_capacity(64 + self.body.len());

        buf.extend_from_slice(self.command.as_str().as_bytes());
        buf.push(b'\n');

        for (name, value) in &self.headers {
            if name == "content-length" {
                continue;
            }
            push_header_text(&mut buf, name, escape);
            buf.push(b':');
            push_header_text(&mut buf, value, escape);
            buf.push(b'\n');
        }

        if !self.body.is_empty() {
            buf.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        buf.push(b'\n');
        buf.extend_from_slice(&self.body);
        buf.push(0);

        if buf.len() > Self::MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: buf.len(),
                max: Self::MAX_FRAME_SIZE,
            });
        }

        Ok(buf)
    }

    /// Decode one packet.
    ///
    /// Leading EOLs are skipped; a packet with nothing else is a heartbeat.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `src` exceeds the size limit
    /// - `ProtocolError::UnknownCommand` for an unrecognized command line
    /// - `ProtocolError::MalformedHeader` / `InvalidEscape` / `InvalidUtf8`
    ///   for a bad header block
    /// - `ProtocolError::Truncated` if the header block or body is incomplete
    /// - `ProtocolError::TrailingData` if non-EOL bytes follow the terminator
    pub fn decode(src: &[u8]) -> Result<Packet> {
        if src.len() > Self::MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: src.len(), max: Self::MAX_FRAME_SIZE });
        }

        let Some(start) = src.iter().position(|b| !is_eol(*b)) else {
            return Ok(Packet::Heartbeat);
        };
        let src = &src[start..];
        let mut pos = 0;

        let command_line = utf8(next_line(src, &mut pos)?)?;
        let command = Command::parse(command_line)
            .ok_or_else(|| ProtocolError::UnknownCommand(command_line.to_string()))?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let line = utf8(next_line(src, &mut pos)?)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let declared = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let (body, rest) = match declared {
            Some(len) => {
                let end = pos.checked_add(len).filter(|end| *end < src.len()).ok_or(
                    ProtocolError::Truncated("body shorter than content-length"),
                )?;
                if src[end] != 0 {
                    return Err(ProtocolError::Truncated("missing NUL after content-length body"));
                }
                (&src[pos..end], &src[end + 1..])
            },
            None => {
                let nul = src[pos..]
                    .iter()
                    .position(|b| *b == 0)
                    .ok_or(ProtocolError::Truncated("missing NUL terminator"))?;
                (&src[pos..pos + nul], &src[pos + nul + 1..])
            },
        };

        let trailing = rest.iter().filter(|b| !is_eol(**b)).count();
        if trailing > 0 {
            return Err(ProtocolError::TrailingData(trailing));
        }

        Ok(Packet::Frame(Self { command, headers, body: Bytes::copy_from_slice(body) }))
    }
}

fn is_eol(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Next EOL-terminated line starting at `pos`, without the EOL.
fn next_line<'a>(src: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let rest = &src[*pos..];
    let newline = rest
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(ProtocolError::Truncated("missing end of header block"))?;
    *pos += newline + 1;

    let line = &rest[..newline];
    Ok(line.strip_suffix(b"\r").unwrap_or(line))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

fn push_header_text(buf: &mut Vec<u8>, text: &str, escape: bool) {
    if !escape {
        buf.extend_from_slice(text.as_bytes());
        return;
    }
    for ch in text.chars() {
        match ch {
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            ':' => buf.extend_from_slice(b"\\c"),
            other => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(other.encode_utf8(&mut tmp).as_bytes());
            },
        }
    }
}

fn unescape(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::InvalidEscape(text.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_frame(src: &[u8]) -> Frame {
        match Frame::decode(src).unwrap() {
            Packet::Frame(frame) => frame,
            Packet::Heartbeat => unreachable!("expected a frame"),
        }
    }

    #[test]
    fn encode_message_with_body() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/app/chat.send")
            .with_body(&b"{}"[..]);

        let encoded = frame.to_vec().unwrap();
        insta::assert_snapshot!(
            String::from_utf8_lossy(&encoded).replace('\0', "^@"),
            @r"
        SEND
        destination:/app/chat.send
        content-length:2

        {}^@
        "
        );
    }

    #[test]
    fn eol_only_packets_are_heartbeats() {
        assert_eq!(Frame::decode(b"\n").unwrap(), Packet::Heartbeat);
        assert_eq!(Frame::decode(b"\r\n\n").unwrap(), Packet::Heartbeat);
        assert_eq!(Frame::decode(b"").unwrap(), Packet::Heartbeat);
    }

    #[test]
    fn decode_connected_keeps_raw_header_values() {
        let frame = decode_frame(b"CONNECTED\nversion:1.2\nheart-beat:0,10000\n\n\0");
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("heart-beat"), Some("0,10000"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_accepts_crlf_and_trailing_eols() {
        let frame = decode_frame(b"\nMESSAGE\r\nsubscription:sub-0\r\n\r\nhi\0\n\n");
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(&frame.body[..], b"hi");
    }

    #[test]
    fn decode_honours_content_length_with_embedded_nul() {
        let frame = decode_frame(b"MESSAGE\ncontent-length:3\n\na\0b\0");
        assert_eq!(&frame.body[..], b"a\0b");
    }

    #[test]
    fn header_escapes_round_trip() {
        let frame = Frame::new(Command::Message).with_header("note", "a:b\\c\nd");
        let encoded = frame.to_vec().unwrap();
        assert!(encoded.windows(2).any(|w| w == b"\\c"));

        let decoded = decode_frame(&encoded);
        assert_eq!(decoded.header("note"), Some("a:b\\c\nd"));
    }

    #[test]
    fn first_duplicate_header_wins() {
        let frame = decode_frame(b"MESSAGE\nfoo:first\nfoo:second\n\n\0");
        assert_eq!(frame.header("foo"), Some("first"));
        assert_eq!(frame.headers().len(), 2);
    }

    #[test]
    fn caller_content_length_is_replaced() {
        let frame = Frame::new(Command::Send).with_header("content-length", "999").with_body("ab");
        let decoded = decode_frame(&frame.to_vec().unwrap());
        assert_eq!(decoded.header("content-length"), Some("2"));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(Frame::decode(b"BOGUS\n\n\0"), Err(ProtocolError::UnknownCommand(_))));
        assert!(matches!(
            Frame::decode(b"MESSAGE\nno-colon\n\n\0"),
            Err(ProtocolError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::decode(b"MESSAGE\nbad:\\t\n\n\0"),
            Err(ProtocolError::InvalidEscape(_))
        ));
        assert!(matches!(Frame::decode(b"MESSAGE\n\nbody"), Err(ProtocolError::Truncated(_))));
        assert!(matches!(
            Frame::decode(b"MESSAGE\ncontent-length:10\n\nshort\0"),
            Err(ProtocolError::Truncated(_))
        ));
        assert!(matches!(
            Frame::decode(b"MESSAGE\n\nbody\0junk"),
            Err(ProtocolError::TrailingData(4))
        ));
        assert!(matches!(
            Frame::decode(b"MESSAGE\ncontent-length:x\n\n\0"),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let body = vec![b'a'; Frame::MAX_FRAME_SIZE];
        let frame = Frame::new(Command::Send).with_body(body);
        assert!(matches!(frame.to_vec(), Err(ProtocolError::FrameTooLarge { .. })));
    }
}
