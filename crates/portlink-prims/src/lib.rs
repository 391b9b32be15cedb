//! Building-block primitives shared across the portlink workspace.
//!
//! Three small contracts the channel protocol is written against:
//! - [`dispose`] — at-most-once cleanup registration and arena-style stores
//! - [`event`] — single-topic publish/subscribe with lifecycle hooks
//! - [`deferred`] — externally settled promises for reply correlation

pub mod deferred;
pub mod dispose;
pub mod error;
pub mod event;

pub use deferred::{Deferred, Promise};
pub use dispose::{Disposable, Dispose, DisposeHandle, DisposeStore, Subscription};
pub use error::{DisposeError, Result};
pub use event::{Event, EventOptions};
