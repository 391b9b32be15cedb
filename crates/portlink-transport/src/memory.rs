//! In-process message port pair.
//!
//! Delivery is synchronous: `send` on one side invokes the other side's
//! listeners on the calling thread before returning. This makes the pair
//! deterministic for tests and cheap for same-process endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use portlink_buffer::Payload;
use portlink_channel::{MessagePort, PortError, PortListener, TransferList};
use portlink_prims::Subscription;

struct Side {
    listeners: Mutex<Vec<(u64, PortListener)>>,
    next_id: Mutex<u64>,
    closed: AtomicBool,
}

impl Side {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn deliver(&self, payload: Payload, transfer: TransferList) {
        let listeners: Vec<PortListener> = {
            let guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(payload.clone(), transfer.clone());
        }
    }
}

/// One end of an in-memory duplex port pair.
pub struct MemoryPort {
    local: Arc<Side>,
    remote: Arc<Side>,
}

impl MemoryPort {
    /// Create two linked ports; what one sends, the other receives.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Side::new();
        let b = Side::new();
        let left = Arc::new(Self {
            local: Arc::clone(&a),
            remote: Arc::clone(&b),
        });
        let right = Arc::new(Self {
            local: b,
            remote: a,
        });
        (left, right)
    }

    pub fn is_closed(&self) -> bool {
        self.local.closed.load(Ordering::SeqCst)
    }
}

impl MessagePort for MemoryPort {
    fn send(
        &self,
        payload: Payload,
        transfer: Option<TransferList>,
    ) -> std::result::Result<(), PortError> {
        if self.local.closed.load(Ordering::SeqCst) || self.remote.closed.load(Ordering::SeqCst) {
            return Err(PortError::Closed);
        }
        self.remote.deliver(payload, transfer.unwrap_or_default());
        Ok(())
    }

    fn subscribe(&self, listener: PortListener) -> Subscription {
        let id = {
            let mut next = self.local.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            let id = *next;
            *next += 1;
            id
        };
        self.local
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        let weak: Weak<Side> = Arc::downgrade(&self.local);
        Subscription::new(move || {
            if let Some(side) = weak.upgrade() {
                side.listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    fn close(&self) {
        self.local.closed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPort")
            .field("closed", &self.is_closed())
            .finish()
    }
}
