//! Length-prefixed payload framing for byte streams.
//!
//! Wire format:
//! ```text
//! ┌────────────┬───────────┬─────────────┬─────────────────┐
//! │ Magic (2B) │ Kind (1B) │ Length (4B) │ Payload         │
//! │ 0x50 0x4C  │ 0 = text  │ LE          │ (Length bytes)  │
//! │ "PL"       │ 1 = binary│             │                 │
//! └────────────┴───────────┴─────────────┴─────────────────┘
//! ```
//!
//! The kind byte preserves the [`Payload`] text/binary distinction across
//! the stream, so a text-format buffer on one side decodes text on the
//! other.

use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use portlink_buffer::Payload;

use crate::error::{Result, TransportError};

/// Frame header: magic (2) + kind (1) + length (4) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Magic bytes: "PL" (0x50 0x4C).
pub const MAGIC: [u8; 2] = [0x50, 0x4C];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Encode one payload into the wire format.
pub fn encode_frame(payload: &Payload, dst: &mut BytesMut) -> Result<()> {
    let bytes = payload.as_bytes();
    if bytes.len() > u32::MAX as usize {
        return Err(TransportError::PayloadTooLarge {
            size: bytes.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + bytes.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(match payload {
        Payload::Text(_) => KIND_TEXT,
        Payload::Binary(_) => KIND_BINARY,
    });
    dst.put_u32_le(bytes.len() as u32);
    dst.put_slice(bytes);
    Ok(())
}

/// Decode one payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet. On
/// success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Payload>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let kind = src[2];
    if kind != KIND_TEXT && kind != KIND_BINARY {
        return Err(TransportError::UnknownPayloadKind(kind));
    }

    let payload_len = u32::from_le_bytes(src[3..7].try_into().unwrap()) as usize;
    if payload_len > max_payload {
        return Err(TransportError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(payload_len).freeze();

    let payload = match kind {
        KIND_TEXT => Payload::Text(String::from_utf8(body.to_vec())?),
        _ => Payload::Binary(body),
    };
    Ok(Some(payload))
}

/// Reads complete payload frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete payloads.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete payload (blocking).
    ///
    /// Returns `Err(TransportError::ConnectionClosed)` at EOF.
    pub fn read_payload(&mut self) -> Result<Payload> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Writes complete payload frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one payload (blocking), then flush.
    pub fn write_payload(&mut self, payload: &Payload) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;

    #[test]
    fn text_and_binary_round_trip() {
        let mut wire = BytesMut::new();
        encode_frame(&Payload::Text("hello".to_string()), &mut wire).unwrap();
        encode_frame(&Payload::Binary(Bytes::from_static(b"\x00\x01\x02")), &mut wire).unwrap();

        let first = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(first, Payload::Text("hello".to_string()));

        let second = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(second, Payload::Binary(Bytes::from_static(b"\x00\x01\x02")));
        assert!(wire.is_empty());
    }

    #[test]
    fn incomplete_header_or_payload_needs_more_data() {
        let mut partial = BytesMut::from(&MAGIC[..]);
        assert!(decode_frame(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_none());

        let mut wire = BytesMut::new();
        encode_frame(&Payload::Text("truncated".to_string()), &mut wire).unwrap();
        wire.truncate(HEADER_SIZE + 3);
        assert!(decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut wire = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD),
            Err(TransportError::InvalidMagic)
        ));
    }

    #[test]
    fn unknown_kind_byte_rejected() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u8(7);
        wire.put_u32_le(0);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD),
            Err(TransportError::UnknownPayloadKind(7))
        ));
    }

    #[test]
    fn oversized_payload_rejected_both_ways() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u8(KIND_BINARY);
        wire.put_u32_le(1024 * 1024 * 32);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD),
            Err(TransportError::PayloadTooLarge { .. })
        ));

        let config = FrameConfig {
            max_payload_size: 4,
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);
        assert!(matches!(
            writer.write_payload(&Payload::Text("oversized".to_string())),
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn reader_assembles_partial_reads() {
        let mut wire = BytesMut::new();
        encode_frame(&Payload::Text("slow".to_string()), &mut wire).unwrap();

        struct ByteByByte {
            bytes: Vec<u8>,
            pos: usize,
        }
        impl Read for ByteByByte {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.bytes.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }

        let mut reader = FrameReader::new(ByteByByte {
            bytes: wire.to_vec(),
            pos: 0,
        });
        assert_eq!(
            reader.read_payload().unwrap(),
            Payload::Text("slow".to_string())
        );
    }

    #[test]
    fn eof_is_connection_closed() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(
            reader.read_payload(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn writer_to_reader_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.write_payload(&Payload::Text("ping".to_string())).unwrap();
        writer
            .write_payload(&Payload::Binary(Bytes::from_static(b"pong")))
            .unwrap();

        assert_eq!(
            reader.read_payload().unwrap(),
            Payload::Text("ping".to_string())
        );
        assert_eq!(
            reader.read_payload().unwrap(),
            Payload::Binary(Bytes::from_static(b"pong"))
        );
    }

    #[test]
    fn invalid_utf8_text_frame_rejected() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u8(KIND_TEXT);
        wire.put_u32_le(2);
        wire.put_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD),
            Err(TransportError::InvalidText(_))
        ));
    }
}
