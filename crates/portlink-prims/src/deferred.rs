use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Externally settled future.
///
/// The settling side holds the `Deferred`; any number of waiting sides hold
/// cloned [`Promise`] handles. The first `resolve`/`reject` wins; later
/// settles are reported but ignored.
pub struct Deferred<T, E> {
    shared: Arc<Shared<T, E>>,
}

/// Waitable handle onto a [`Deferred`].
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    state: Mutex<Option<Result<T, E>>>,
    settled: Condvar,
}

impl<T: Clone, E: Clone> Deferred<T, E> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(None),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn promise(&self) -> Promise<T, E> {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, err: E) -> bool {
        self.settle(Err(err))
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.shared.state).is_some()
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let mut state = lock(&self.shared.state);
        if state.is_some() {
            return false;
        }
        *state = Some(outcome);
        drop(state);
        self.shared.settled.notify_all();
        true
    }
}

impl<T: Clone, E: Clone> Default for Deferred<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, E: Clone> Promise<T, E> {
    /// Non-blocking read of the settled outcome.
    pub fn try_get(&self) -> Option<Result<T, E>> {
        lock(&self.shared.state).clone()
    }

    /// Block until settled.
    pub fn wait(&self) -> Result<T, E> {
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(outcome) = state.as_ref() {
                return outcome.clone();
            }
            state = self
                .shared
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until settled or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        while state.is_none() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .shared
                .settled
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.clone()
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.shared.state).is_some()
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> std::fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn resolve_settles_waiters() {
        let deferred: Deferred<i32, String> = Deferred::new();
        let promise = deferred.promise();

        let waiter = thread::spawn(move || promise.wait());

        assert!(deferred.resolve(42));
        assert_eq!(waiter.join().unwrap(), Ok(42));
    }

    #[test]
    fn first_settle_wins() {
        let deferred: Deferred<i32, String> = Deferred::new();
        let promise = deferred.promise();

        assert!(deferred.resolve(1));
        assert!(!deferred.resolve(2));
        assert!(!deferred.reject("late".to_string()));

        assert_eq!(promise.wait(), Ok(1));
    }

    #[test]
    fn reject_propagates_error() {
        let deferred: Deferred<i32, String> = Deferred::new();
        let promise = deferred.promise();

        deferred.reject("boom".to_string());
        assert_eq!(promise.wait(), Err("boom".to_string()));
    }

    #[test]
    fn try_get_is_non_blocking() {
        let deferred: Deferred<i32, String> = Deferred::new();
        let promise = deferred.promise();

        assert!(promise.try_get().is_none());
        deferred.resolve(5);
        assert_eq!(promise.try_get(), Some(Ok(5)));
    }

    #[test]
    fn wait_timeout_expires_when_unsettled() {
        let deferred: Deferred<i32, String> = Deferred::new();
        let promise = deferred.promise();

        assert!(promise.wait_timeout(Duration::from_millis(10)).is_none());
        assert!(!deferred.is_settled());
    }
}
