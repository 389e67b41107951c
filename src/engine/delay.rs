//! The cross-thread virtual-delay ledger.
//!
//! A virtual speedup of the target region is simulated by making every other
//! thread pay real sleep time. Each thread accumulates `local_delay` when it
//! is sampled inside the target region; periodically it settles that balance
//! against the global ledger, sleeping when behind and donating the excess
//! when ahead. Over time every thread's `local_delay` converges toward the
//! ledger, so no thread free-rides ahead of the slowdown applied to the rest
//! of the system.

use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Sleeps for at least `nanos` and reports the time actually spent, since
/// timed waits may over- or under-shoot. Non-positive requests return zero
/// without suspending.
pub fn sleep_exact(nanos: i64) -> i64 {
    if nanos <= 0 {
        return 0;
    }
    let start = Instant::now();
    thread::sleep(Duration::from_nanos(nanos as u64));
    i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Nanoseconds of virtual delay owed across all threads. Reset only between
/// experiments; read back into the trial record at experiment end.
#[derive(Debug, Default)]
pub struct DelayLedger {
    total: AtomicI64,
}

impl DelayLedger {
    pub fn new() -> Self {
        Self { total: AtomicI64::new(0) }
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Release);
    }

    /// Settles a thread's balance against the ledger: sleep the shortfall
    /// (crediting the time actually slept, which may overshoot) or donate
    /// the excess. Called every settlement boundary and on thread removal.
    pub fn settle(&self, local_delay: &AtomicI64) {
        let diff = self.total.load(Ordering::Acquire) - local_delay.load(Ordering::Relaxed);
        if diff > 0 {
            let slept = sleep_exact(diff);
            local_delay.fetch_add(slept, Ordering::Relaxed);
        } else {
            self.total.fetch_add(-diff, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const QUANTUM: i64 = 200_000; // 0.2ms keeps the test fast

    #[test]
    fn settle_sleeps_shortfall_and_donates_excess() {
        let ledger = DelayLedger::new();
        let local = AtomicI64::new(3 * QUANTUM);
        ledger.settle(&local);
        assert_eq!(ledger.total(), 3 * QUANTUM);
        assert_eq!(local.load(Ordering::Relaxed), 3 * QUANTUM);

        let behind = AtomicI64::new(0);
        ledger.settle(&behind);
        // Sleeps may overshoot but never undershoot the shortfall.
        assert!(behind.load(Ordering::Relaxed) >= 3 * QUANTUM);
    }

    #[test]
    fn local_delays_converge_on_the_ledger() {
        let ledger = Arc::new(DelayLedger::new());
        let mut handles = Vec::new();
        let mut locals = Vec::new();
        for worker in 0..4u64 {
            let local = Arc::new(AtomicI64::new(0));
            locals.push(Arc::clone(&local));
            let ledger = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                let mut slept_total = 0i64;
                for signal in 1..=40u64 {
                    // Synthetic hit pattern: workers accrue delay at
                    // different rates, as if spending different shares of
                    // their time inside the target region.
                    if signal % (worker + 1) == 0 {
                        local.fetch_add(QUANTUM, Ordering::Relaxed);
                    }
                    if signal % 10 == 0 {
                        let before = local.load(Ordering::Relaxed);
                        ledger.settle(&local);
                        let after = local.load(Ordering::Relaxed);
                        if after > before {
                            slept_total += after - before;
                        }
                    }
                }
                slept_total
            }));
        }
        let mut slept_per_thread: Vec<i64> =
            handles.into_iter().map(|h| h.join().expect("worker")).collect();

        // Drain remaining skew: repeated settlement rounds with no new hits
        // must converge every thread onto the ledger.
        for _ in 0..3 {
            for (slept, local) in slept_per_thread.iter_mut().zip(&locals) {
                let before = local.load(Ordering::Relaxed);
                ledger.settle(local);
                let after = local.load(Ordering::Relaxed);
                if after > before {
                    *slept += after - before;
                }
            }
        }

        // Sleep overshoot on a loaded machine can reach several ms.
        let tolerance = QUANTUM + 20_000_000;
        let total = ledger.total();
        for local in &locals {
            let diff = (total - local.load(Ordering::Relaxed)).abs();
            assert!(
                diff <= tolerance,
                "local delay diverged from ledger by {diff}ns"
            );
        }
        // No single thread pays more sleep than the ledger ever demanded.
        for slept in &slept_per_thread {
            assert!(
                *slept <= total + tolerance,
                "slept {slept}ns exceeds ledger {total}ns"
            );
        }
    }
}
