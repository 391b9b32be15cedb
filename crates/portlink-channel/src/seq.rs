use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Process-wide counter distinguishing protocol instances created
/// concurrently.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Allocates sequence ids of the form `{instance_key}_{counter}`.
///
/// The counter starts at zero and increments on every allocation, whether or
/// not the surrounding call succeeds; ids are never reused. The instance key
/// combines a process-start nonce with an instance counter, so two generators
/// created back to back still produce globally distinct ids without a shared
/// seen-set.
pub struct SeqGen {
    key: String,
    counter: AtomicU64,
}

impl SeqGen {
    pub fn new() -> Self {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self {
            key: format!("{:08x}{instance:x}", process_nonce()),
            counter: AtomicU64::new(0),
        }
    }

    /// The instance key shared by every id from this generator.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Allocate the next sequence id.
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{n}", self.key)
    }

    /// Number of ids allocated so far.
    pub fn allocated(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for SeqGen {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SeqGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqGen")
            .field("key", &self.key)
            .field("allocated", &self.allocated())
            .finish()
    }
}

fn process_nonce() -> u32 {
    static NONCE: OnceLock<u32> = OnceLock::new();
    *NONCE.get_or_init(|| {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        nanos ^ std::process::id()
    })
}
