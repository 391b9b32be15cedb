//! Bidirectional channel-protocol RPC over pluggable transports.
//!
//! portlink multiplexes promise-style calls and event-style subscriptions
//! over any duplex message port, with middleware pipelines, reconnect
//! buffering, and pluggable serialization.
//!
//! # Crate Structure
//!
//! - [`prims`] — Disposal, event, and deferred primitives
//! - [`buffer`] — Serialization buffers and the format registry
//! - [`channel`] — The channel protocol: pipelines, correlation, ports
//! - [`endpoint`] — Path-keyed service and client registries
//! - [`transport`] — Memory, byte-stream, and Unix-socket transports

/// Re-export primitive types.
pub mod prims {
    pub use portlink_prims::*;
}

/// Re-export serialization buffer types.
pub mod buffer {
    pub use portlink_buffer::*;
}

/// Re-export channel protocol types.
pub mod channel {
    pub use portlink_channel::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use portlink_endpoint::*;
}

/// Re-export transport types.
pub mod transport {
    pub use portlink_transport::*;
}
