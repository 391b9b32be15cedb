//! Message port over a framed byte stream.
//!
//! Wraps any `Read`/`Write` pair (socket halves, pipes) in the frame codec
//! and a background reader thread that feeds subscribed listeners.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use portlink_buffer::Payload;
use portlink_channel::{MessagePort, PortError, PortListener, TransferList};
use portlink_prims::Subscription;

use crate::error::TransportError;
use crate::frame::{FrameConfig, FrameReader, FrameWriter};

struct Listeners {
    entries: Mutex<Vec<(u64, PortListener)>>,
    next_id: Mutex<u64>,
}

impl Listeners {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        })
    }

    fn deliver(&self, payload: Payload) {
        let listeners: Vec<PortListener> = {
            let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(payload.clone(), Vec::new());
        }
    }
}

/// A [`MessagePort`] over a duplex byte stream.
///
/// Sends are framed and written under a lock, so any thread may send.
/// Inbound frames arrive on a dedicated reader thread that exits when the
/// peer closes the stream or the port is dropped. Byte streams cannot carry
/// transferable ports; a non-empty transfer list is dropped with a warning.
pub struct StreamPort {
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    listeners: Arc<Listeners>,
    closed: Arc<AtomicBool>,
}

impl StreamPort {
    pub fn spawn(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Arc<Self> {
        Self::spawn_with_config(reader, writer, FrameConfig::default())
    }

    pub fn spawn_with_config(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        config: FrameConfig,
    ) -> Arc<Self> {
        let listeners = Listeners::new();
        let closed = Arc::new(AtomicBool::new(false));

        let port = Arc::new(Self {
            writer: Mutex::new(FrameWriter::with_config(
                Box::new(writer) as Box<dyn Write + Send>,
                config.clone(),
            )),
            listeners: Arc::clone(&listeners),
            closed: Arc::clone(&closed),
        });

        let weak_listeners: Weak<Listeners> = Arc::downgrade(&listeners);
        thread::spawn(move || {
            let mut framed = FrameReader::with_config(reader, config);
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                let payload = match framed.read_payload() {
                    Ok(payload) => payload,
                    Err(TransportError::ConnectionClosed) => {
                        tracing::debug!("stream closed by peer");
                        closed.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "stream read failed");
                        closed.store(true, Ordering::SeqCst);
                        break;
                    }
                };
                // The owning port is gone; stop reading.
                let Some(listeners) = weak_listeners.upgrade() else {
                    break;
                };
                listeners.deliver(payload);
            }
        });

        port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MessagePort for StreamPort {
    fn send(
        &self,
        payload: Payload,
        transfer: Option<TransferList>,
    ) -> std::result::Result<(), PortError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PortError::Closed);
        }
        if let Some(transfer) = transfer {
            if !transfer.is_empty() {
                tracing::warn!(
                    count = transfer.len(),
                    "byte streams cannot carry transferable ports; dropping transfer list"
                );
            }
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_payload(&payload).map_err(|err| match err {
            TransportError::ConnectionClosed => {
                self.closed.store(true, Ordering::SeqCst);
                PortError::Closed
            }
            TransportError::Io(io) => PortError::Io(io),
            other => PortError::Io(std::io::Error::other(other.to_string())),
        })
    }

    fn subscribe(&self, listener: PortListener) -> Subscription {
        let id = {
            let mut next = self
                .listeners
                .next_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = *next;
            *next += 1;
            id
        };
        self.listeners
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        let weak = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners
                    .entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for StreamPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPort")
            .field("closed", &self.is_closed())
            .finish()
    }
}
