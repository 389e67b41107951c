//! Live profiled threads and their per-thread delay accounting.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::HostThreadId;

/// Per-thread profiling state. Mutated only by its owning thread; the
/// registry lock guards membership, not the counters.
#[derive(Debug)]
pub struct ProfiledThread {
    pub host_id: HostThreadId,
    /// Nanoseconds of virtual delay this thread has already absorbed.
    pub local_delay: AtomicI64,
    /// Sampling signals received since the last settlement boundary.
    pub signals_received: AtomicU32,
    /// Progress-point hits pending merge into the global counter.
    pub points_hit: AtomicU64,
}

impl ProfiledThread {
    /// A freshly registered thread owes nothing yet, so it starts level with
    /// the current ledger.
    pub fn new(host_id: HostThreadId, current_ledger: i64) -> Self {
        Self {
            host_id,
            local_delay: AtomicI64::new(current_ledger),
            signals_received: AtomicU32::new(0),
            points_hit: AtomicU64::new(0),
        }
    }
}

/// The set of currently live profiled threads.
///
/// Critical sections are sub-microsecond (insert, remove, iterate-and-signal)
/// and never wrap a blocking call, so a single lock over the whole set is
/// safe to take from the scheduler and from thread lifecycle callbacks.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Mutex<Vec<Arc<ProfiledThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread: Arc<ProfiledThread>) {
        self.threads.lock().push(thread);
    }

    pub fn unregister(&self, thread: &Arc<ProfiledThread>) {
        self.threads.lock().retain(|t| !Arc::ptr_eq(t, thread));
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` for every registered thread while holding the registry lock;
    /// `f` must not block.
    pub fn for_each<F: FnMut(&ProfiledThread)>(&self, mut f: F) {
        for thread in self.threads.lock().iter() {
            f(thread);
        }
    }
}
