//! Length-prefixed message codec used by the socket reference link.
//!
//! A byte stream has no message boundaries, so [`SocketChannel`] wraps every
//! raw channel message in a small link header:
//!
//! ```text
//! ┌──────────────┬──────────┬───────────┬─────────────────┐
//! │ Magic (2B)   │ Kind     │ Length    │ Payload          │
//! │ 0x43 0x4D    │ (1B)     │ (4B LE)   │ (Length bytes)   │
//! │ "CM"         │          │           │                  │
//! └──────────────┴──────────┴───────────┴─────────────────┘
//! ```
//!
//! [`SocketChannel`]: crate::uds::SocketChannel

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, Result};

/// Link header: magic (2) + kind (1) + length (4) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Magic bytes: "CM" (0x43 0x4D).
pub const MAGIC: [u8; 2] = [0x43, 0x4D];

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// What a link message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Bind announcement, sent once by each side when it opens.
    Hello,
    /// One raw channel message.
    Message,
}

impl LinkKind {
    fn to_byte(self) -> u8 {
        match self {
            LinkKind::Hello => 1,
            LinkKind::Message => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(LinkKind::Hello),
            2 => Some(LinkKind::Message),
            _ => None,
        }
    }
}

/// A decoded link message.
#[derive(Debug, Clone)]
pub struct LinkMessage {
    pub kind: LinkKind,
    pub payload: Bytes,
}

/// Encode a link message into `dst`.
pub fn encode_link_message(kind: LinkKind, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(ChannelError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(kind.to_byte());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one link message from `src`.
///
/// Returns `Ok(None)` until `src` holds a complete message, then consumes it.
pub fn decode_link_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<LinkMessage>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(invalid_data("invalid link magic (expected 0x434D \"CM\")"));
    }

    let kind = LinkKind::from_byte(src[2])
        .ok_or_else(|| invalid_data(&format!("unknown link message kind {}", src[2])))?;
    let payload_len = u32::from_le_bytes([src[3], src[4], src[5], src[6]]) as usize;

    if payload_len > max_payload {
        return Err(ChannelError::MessageTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(LinkMessage { kind, payload }))
}

fn invalid_data(msg: &str) -> ChannelError {
    ChannelError::Io(std::io::Error::new(ErrorKind::InvalidData, msg.to_string()))
}

/// Reads complete link messages from a byte stream.
pub struct LinkReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Read> LinkReader<T> {
    pub fn new(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_payload,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(ChannelError::Closed)` at end of stream.
    pub fn read_message(&mut self) -> Result<LinkMessage> {
        loop {
            if let Some(msg) = decode_link_message(&mut self.buf, self.max_payload)? {
                return Ok(msg);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            };

            if read == 0 {
                return Err(ChannelError::Closed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Writes complete link messages to a byte stream.
pub struct LinkWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> LinkWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Encode and write one message, then flush (blocking).
    pub fn write_message(&mut self, kind: LinkKind, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_link_message(kind, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn hello_then_message_decode_in_order() {
        let mut buf = BytesMut::new();
        encode_link_message(LinkKind::Hello, b"", &mut buf).unwrap();
        encode_link_message(LinkKind::Message, b"\x00hi", &mut buf).unwrap();

        let hello = decode_link_message(&mut buf, 64).unwrap().unwrap();
        assert_eq!(hello.kind, LinkKind::Hello);
        assert!(hello.payload.is_empty());

        let msg = decode_link_message(&mut buf, 64).unwrap().unwrap();
        assert_eq!(msg.kind, LinkKind::Message);
        assert_eq!(msg.payload.as_ref(), b"\x00hi");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_message_waits_for_more() {
        let mut buf = BytesMut::new();
        encode_link_message(LinkKind::Message, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_link_message(&mut buf, 64).unwrap().is_none());
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x02, 0x00, 0x00, 0x00, 0x00][..]);
        let err = decode_link_message(&mut buf, 64).unwrap_err();
        assert!(matches!(err, ChannelError::Io(e) if e.kind() == ErrorKind::InvalidData));
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(9);
        buf.put_u32_le(0);
        let err = decode_link_message(&mut buf, 64).unwrap_err();
        assert!(matches!(err, ChannelError::Io(e) if e.kind() == ErrorKind::InvalidData));
    }

    #[test]
    fn oversized_payload_rejected_from_header() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(2);
        buf.put_u32_le(4096);
        let err = decode_link_message(&mut buf, 64).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::MessageTooLarge { size: 4096, max: 64 }
        ));
    }

    #[test]
    fn reader_reports_closed_at_eof() {
        let mut reader = LinkReader::new(Cursor::new(Vec::<u8>::new()), 64);
        assert!(matches!(reader.read_message(), Err(ChannelError::Closed)));
    }

    #[test]
    fn writer_output_reads_back() {
        let mut writer = LinkWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_message(LinkKind::Message, b"\x01yo").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = LinkReader::new(Cursor::new(wire), 64);
        let msg = reader.read_message().unwrap();
        assert_eq!(msg.kind, LinkKind::Message);
        assert_eq!(msg.payload.as_ref(), b"\x01yo");
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = LinkWriter::new(ZeroWriter);
        let err = writer.write_message(LinkKind::Hello, b"").unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
