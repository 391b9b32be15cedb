//! Service and client endpoints layered over `portlink-channel`.
//!
//! A [`ServiceRegistry`] exposes path-keyed handler sets to a channel's
//! inbound dispatch; a [`ChannelClient`] (or a [`ClientRegistry`] of them)
//! issues calls and event subscriptions against a peer's registered
//! services.

pub mod client;
pub mod service;

pub use client::{ChannelClient, ClientRegistry};
pub use service::ServiceRegistry;
