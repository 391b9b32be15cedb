//! Bidirectional, transport-agnostic RPC channel protocol.
//!
//! A [`ChannelProtocol`] multiplexes promise-style request/response calls
//! and event-style signal subscriptions over any [`MessagePort`]. Outbound
//! and inbound messages flow through explicit stage [`Pipeline`]s; sends
//! attempted while disconnected are parked and resumed on reconnect with
//! their correlation state intact. Wire messages are `[header, body]`
//! arrays encoded through pluggable serialization buffers from
//! `portlink-buffer`.

pub mod context;
pub mod error;
pub mod handler;
pub mod message;
pub mod pipeline;
pub mod port;
pub mod proto;
pub mod seq;

mod stages;

pub use context::{RecvContext, SendContext, SignalListener};
pub use error::{ChannelError, Result};
pub use handler::{CallContext, Handler, HandlerResolver, HandlerSet, SignalEmitter};
pub use message::{
    is_event_method, is_options_method, is_port_transfer_method, Header, Message, RemoteError,
    RequestHeader, RequestKind, ResponseHeader, ResponseKind,
};
pub use pipeline::{GatedContext, Lifecycle, Pipeline, Stage};
pub use port::{MessagePort, PortError, PortListener, TransferList};
pub use proto::{ChannelOptions, ChannelProtocol};
pub use seq::SeqGen;
