//! Serialization buffers: the wire-format boundary of the channel protocol.
//!
//! A write buffer encodes structured values into text or binary payloads;
//! a read buffer decodes them back. The registry maps format identifiers to
//! buffer constructors so custom formats can be plugged in without touching
//! the protocol layer. JSON is the default and always registered.

pub mod error;
pub mod json;
pub mod registry;

pub use error::{BufferError, Result};
pub use json::{JsonReadBuffer, JsonWriteBuffer};
pub use registry::{BufferFactory, BufferPair, BufferRegistry, JSON_FORMAT};

use bytes::Bytes;
use serde_json::Value;

/// An encoded wire payload: text or binary, depending on the active format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Byte length of the encoded payload.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload as raw bytes regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b.as_ref(),
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Binary(b)
    }
}

/// Decodes wire payloads into structured values.
pub trait ReadBuffer: Send + Sync {
    fn decode(&self, data: &Payload) -> Result<Value>;

    /// Format identifier this buffer understands, e.g. `"json"`.
    fn format(&self) -> &'static str;
}

/// Encodes structured values into wire payloads.
pub trait WriteBuffer: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Payload>;

    fn format(&self) -> &'static str;
}
