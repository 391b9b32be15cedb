use std::sync::Arc;

use portlink_buffer::Payload;
use portlink_prims::Subscription;
use serde_json::Value;

/// Opaque transferable handles forwarded alongside a payload.
pub type TransferList = Vec<Value>;

/// Inbound message callback registered on a port.
pub type PortListener = Arc<dyn Fn(Payload, TransferList) + Send + Sync>;

/// The duplex seam every transport adapter implements.
///
/// Adapters must invoke each subscribed listener exactly once per inbound
/// wire message. A channel owns at most one port at a time; rebinding closes
/// the previous one.
pub trait MessagePort: Send + Sync {
    /// Write one encoded message to the peer.
    fn send(&self, payload: Payload, transfer: Option<TransferList>) -> Result<(), PortError>;

    /// Register an inbound listener; dropping the subscription unregisters.
    fn subscribe(&self, listener: PortListener) -> Subscription;

    /// Tear the port down. Subsequent sends fail with [`PortError::Closed`].
    fn close(&self);
}

/// Errors raised by transport ports.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The port has been closed.
    #[error("port closed")]
    Closed,

    /// An I/O error occurred on the underlying transport.
    #[error("port I/O error: {0}")]
    Io(#[from] std::io::Error),
}
