use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::dispose::Subscription;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Hook = Arc<dyn Fn() + Send + Sync>;

/// Behavioral knobs for an [`Event`].
#[derive(Default, Clone)]
pub struct EventOptions {
    /// Replay the most recently fired value to late subscribers.
    pub cold: bool,
    /// Invoked when the listener count goes from zero to one.
    pub on_first_subscriber: Option<Hook>,
    /// Invoked when the listener count drops back to zero.
    pub on_last_subscriber: Option<Hook>,
}

impl std::fmt::Debug for EventOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventOptions")
            .field("cold", &self.cold)
            .field("on_first_subscriber", &self.on_first_subscriber.is_some())
            .field("on_last_subscriber", &self.on_last_subscriber.is_some())
            .finish()
    }
}

/// Single-topic publish/subscribe channel.
///
/// Listeners are invoked synchronously on the firing thread, outside the
/// internal lock, in subscription order.
pub struct Event<T> {
    inner: Arc<EventInner<T>>,
}

struct EventInner<T> {
    state: Mutex<EventState<T>>,
    options: EventOptions,
}

struct EventState<T> {
    listeners: Vec<(u64, Listener<T>)>,
    next_id: u64,
    last: Option<T>,
}

impl<T: Clone + Send + 'static> Event<T> {
    pub fn new() -> Self {
        Self::with_options(EventOptions::default())
    }

    /// An event that replays its last fired value to late subscribers.
    pub fn cold() -> Self {
        Self::with_options(EventOptions {
            cold: true,
            ..EventOptions::default()
        })
    }

    pub fn with_options(options: EventOptions) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    listeners: Vec::new(),
                    next_id: 0,
                    last: None,
                }),
                options,
            }),
        }
    }

    /// Register a listener; the returned token unsubscribes on drop.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let listener: Listener<T> = Arc::new(listener);
        let (id, replay, is_first) = {
            let mut state = lock(&self.inner.state);
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            let replay = if self.inner.options.cold {
                state.last.clone()
            } else {
                None
            };
            (id, replay, state.listeners.len() == 1)
        };

        if is_first {
            if let Some(hook) = &self.inner.options.on_first_subscriber {
                hook();
            }
        }

        if let Some(value) = replay {
            listener(&value);
        }

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            EventInner::remove(&weak, id);
        })
    }

    /// Deliver a value to every current listener.
    pub fn fire(&self, value: T) {
        let listeners: Vec<Listener<T>> = {
            let mut state = lock(&self.inner.state);
            if self.inner.options.cold {
                state.last = Some(value.clone());
            }
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in listeners {
            listener(&value);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.state).listeners.len()
    }
}

impl<T: Clone + Send + 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> EventInner<T> {
    fn remove(weak: &Weak<EventInner<T>>, id: u64) {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let became_empty = {
            let mut state = lock(&inner.state);
            let before = state.listeners.len();
            state.listeners.retain(|(listener_id, _)| *listener_id != id);
            before > 0 && state.listeners.is_empty()
        };

        if became_empty {
            if let Some(hook) = &inner.options.on_last_subscriber {
                hook();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
