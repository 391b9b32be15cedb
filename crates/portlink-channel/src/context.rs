use std::sync::Arc;

use portlink_buffer::Payload;
use portlink_prims::Promise;
use serde_json::Value;

use crate::message::{Message, RemoteError, RequestHeader, RequestKind};
use crate::pipeline::{GatedContext, Lifecycle};
use crate::port::TransferList;

/// Persistent continuation registered for an event-method call.
pub type SignalListener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Accumulated state of one outbound send as it moves through the pipeline.
///
/// A context halted by the disconnect gate is parked whole, so a later
/// resume re-enters the pipeline exactly where it stopped.
pub struct SendContext {
    pub path: String,
    pub method: String,
    pub args: Vec<Value>,
    /// Explicit kind override; when `None`, `prepare` classifies by name.
    pub kind: Option<RequestKind>,
    pub listener: Option<SignalListener>,
    pub transfer: Option<TransferList>,
    pub header: Option<RequestHeader>,
    pub body: Vec<Value>,
    pub is_options: bool,
    pub encoded: Option<Payload>,
    pub reply: Option<Promise<Value, RemoteError>>,
    min_lifecycle: Lifecycle,
    halted_at: Option<&'static str>,
}

impl SendContext {
    pub fn new(path: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            args,
            kind: None,
            listener: None,
            transfer: None,
            header: None,
            body: Vec::new(),
            is_options: false,
            encoded: None,
            reply: None,
            min_lifecycle: Lifecycle::Initial,
            halted_at: None,
        }
    }

    pub fn with_listener(mut self, listener: SignalListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_transfer(mut self, transfer: TransferList) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Sequence id allocated by `prepare`, once it has run.
    pub fn seq_id(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.seq_id.as_str())
    }
}

impl GatedContext for SendContext {
    fn min_lifecycle(&self) -> Lifecycle {
        self.min_lifecycle
    }

    fn set_min_lifecycle(&mut self, gate: Lifecycle) {
        self.min_lifecycle = gate;
    }

    fn halted_at(&self) -> Option<&'static str> {
        self.halted_at
    }

    fn set_halted_at(&mut self, stage: Option<&'static str>) {
        self.halted_at = stage;
    }
}

impl std::fmt::Debug for SendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendContext")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("seq_id", &self.seq_id())
            .field("is_options", &self.is_options)
            .field("halted_at", &self.halted_at)
            .finish()
    }
}

/// Accumulated state of one inbound message.
pub struct RecvContext {
    pub raw: Payload,
    pub ports: TransferList,
    pub message: Option<Message>,
    min_lifecycle: Lifecycle,
    halted_at: Option<&'static str>,
}

impl RecvContext {
    pub fn new(raw: Payload, ports: TransferList) -> Self {
        Self {
            raw,
            ports,
            message: None,
            min_lifecycle: Lifecycle::Initial,
            halted_at: None,
        }
    }
}

impl GatedContext for RecvContext {
    fn min_lifecycle(&self) -> Lifecycle {
        self.min_lifecycle
    }

    fn set_min_lifecycle(&mut self, gate: Lifecycle) {
        self.min_lifecycle = gate;
    }

    fn halted_at(&self) -> Option<&'static str> {
        self.halted_at
    }

    fn set_halted_at(&mut self, stage: Option<&'static str>) {
        self.halted_at = stage;
    }
}

impl std::fmt::Debug for RecvContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvContext")
            .field("bytes", &self.raw.len())
            .field("decoded", &self.message.is_some())
            .finish()
    }
}
