//! Transport adapters for the channel protocol.
//!
//! Three ways to move channel payloads between endpoints:
//! - [`MemoryPort`]: synchronous in-process pair, mainly for tests and
//!   same-process endpoints.
//! - [`StreamPort`]: any `Read`/`Write` pair, framed with a length prefix
//!   and a reader thread.
//! - [`UdsListener`] / [`connect_uds`]: Unix domain sockets built on
//!   [`StreamPort`] (Unix only).

pub mod error;
pub mod frame;
pub mod memory;
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use frame::{FrameConfig, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
pub use memory::MemoryPort;
pub use stream::StreamPort;
#[cfg(unix)]
pub use uds::{connect_uds, connect_uds_with_config, UdsListener, DEFAULT_SOCKET_MODE};
