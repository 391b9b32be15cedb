use crate::error::{DisposeError, Result};

/// At-most-once teardown of an owned resource.
pub trait Dispose {
    /// Release the resource. Later calls are no-ops returning `Ok(())`.
    fn dispose(&mut self) -> Result<()>;
}

/// Wraps a cleanup closure and guarantees it runs at most once.
pub struct Disposable {
    cleanup: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl Disposable {
    /// Create a disposable from an infallible cleanup.
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self::fallible(move || {
            cleanup();
            Ok(())
        })
    }

    /// Create a disposable whose cleanup may fail.
    pub fn fallible(cleanup: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// A disposable with no cleanup attached.
    pub fn noop() -> Self {
        Self { cleanup: None }
    }

    /// True once the cleanup has run (or never existed).
    pub fn is_disposed(&self) -> bool {
        self.cleanup.is_none()
    }
}

impl Dispose for Disposable {
    fn dispose(&mut self) -> Result<()> {
        match self.cleanup.take() {
            Some(cleanup) => cleanup(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle identifying an entry owned by a [`DisposeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisposeHandle(usize);

/// Owns a set of disposables and releases all of them exactly once.
///
/// Individual cleanup failures are collected and returned, never allowed to
/// stop the remaining entries from being released.
pub struct DisposeStore {
    entries: Vec<Option<Box<dyn Dispose + Send>>>,
    disposed: bool,
}

impl DisposeStore {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            disposed: false,
        }
    }

    /// Take ownership of a disposable.
    ///
    /// Adding to an already-disposed store releases the entry immediately.
    pub fn add(&mut self, d: impl Dispose + Send + 'static) -> DisposeHandle {
        let mut boxed: Box<dyn Dispose + Send> = Box::new(d);
        if self.disposed {
            tracing::warn!("entry added to disposed store; releasing immediately");
            if let Err(err) = boxed.dispose() {
                tracing::warn!(error = %err, "immediate release failed");
            }
            return DisposeHandle(usize::MAX);
        }

        self.entries.push(Some(boxed));
        DisposeHandle(self.entries.len() - 1)
    }

    /// Detach an entry without disposing it.
    pub fn remove(&mut self, handle: DisposeHandle) -> Option<Box<dyn Dispose + Send>> {
        self.entries.get_mut(handle.0).and_then(Option::take)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release every owned entry exactly once, in insertion order.
    ///
    /// Idempotent: a second call finds nothing to release and returns an
    /// empty error list.
    pub fn dispose_all(&mut self) -> Vec<DisposeError> {
        self.disposed = true;
        let mut failures = Vec::new();
        for entry in self.entries.iter_mut() {
            if let Some(mut d) = entry.take() {
                if let Err(err) = d.dispose() {
                    failures.push(err);
                }
            }
        }
        self.entries.clear();
        failures
    }
}

impl Default for DisposeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispose for DisposeStore {
    fn dispose(&mut self) -> Result<()> {
        let failures = self.dispose_all();
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}

/// Unsubscribe token returned by events and ports.
///
/// Unsubscribes when dropped; call [`Subscription::detach`] to keep the
/// registration alive past the token.
pub struct Subscription {
    inner: Disposable,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Disposable::new(unsubscribe),
        }
    }

    pub fn noop() -> Self {
        Self {
            inner: Disposable::noop(),
        }
    }

    /// Explicitly unsubscribe now.
    pub fn unsubscribe(&mut self) {
        let _ = self.inner.dispose();
    }

    /// Leave the registration in place permanently.
    pub fn detach(mut self) {
        self.inner.cleanup = None;
    }
}

impl Dispose for Subscription {
    fn dispose(&mut self) -> Result<()> {
        self.inner.dispose()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.inner.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn disposable_runs_cleanup_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let mut d = Disposable::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        d.dispose().unwrap();
        d.dispose().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(d.is_disposed());
    }

    #[test]
    fn store_disposes_all_entries_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut store = DisposeStore::new();

        for _ in 0..3 {
            let count = Arc::clone(&count);
            store.add(Disposable::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(store.len(), 3);
        assert!(store.dispose_all().is_empty());
        assert!(store.dispose_all().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(store.is_disposed());
    }

    #[test]
    fn store_isolates_failures() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut store = DisposeStore::new();

        store.add(Disposable::fallible(|| {
            Err(DisposeError::CleanupFailed("first".to_string()))
        }));
        {
            let count = Arc::clone(&count);
            store.add(Disposable::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        store.add(Disposable::fallible(|| {
            Err(DisposeError::CleanupFailed("third".to_string()))
        }));

        let failures = store.dispose_all();
        assert_eq!(failures.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_detaches_without_disposing() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut store = DisposeStore::new();

        let handle = {
            let count = Arc::clone(&count);
            store.add(Disposable::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };

        let detached = store.remove(handle);
        assert!(detached.is_some());
        assert!(store.is_empty());

        store.dispose_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn add_after_dispose_releases_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut store = DisposeStore::new();
        store.dispose_all();

        let count_clone = Arc::clone(&count);
        store.add(Disposable::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_unsubscribes_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            let _sub = Subscription::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_subscription_never_unsubscribes() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = Arc::clone(&count);
            let sub = Subscription::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            sub.detach();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
