//! The per-thread sampling path and the shared candidate-frame buffer.
//!
//! [`Profiler::on_sample`] is invoked by the host on whichever thread a
//! sampling interrupt landed on. It runs under the signal-path contract: no
//! heap allocation beyond pre-sized buffers, no lock the interrupted thread
//! could already hold, bounded time. The only wait it may perform is the
//! bounded settlement sleep of the delay protocol.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::host::CallFrame;

use super::{Profiler, KNOWN_STACK_ERRORS, MAX_CAPTURE_FRAMES, SETTLE_SIGNAL_INTERVAL};

/// Bounded shared buffer of candidate frames.
///
/// The append index keeps advancing past capacity; overflowing appends are
/// dropped rather than blocking, so a sampling burst is silently bounded.
#[derive(Debug)]
pub struct SampleBuffer {
    slots: Mutex<Vec<CallFrame>>,
    appended: AtomicUsize,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            appended: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Appends a candidate frame, dropping it when the buffer is full. The
    /// slot vector never grows past its pre-sized capacity, so no allocation
    /// happens on this path.
    pub fn push(&self, frame: CallFrame) {
        let mut slots = self.slots.lock();
        let index = self.appended.fetch_add(1, Ordering::Relaxed);
        if index < self.capacity {
            slots.push(frame);
        }
    }

    /// Swaps out the buffered frames and resets the append index.
    pub fn drain(&self) -> Vec<CallFrame> {
        let mut slots = self.slots.lock();
        self.appended.store(0, Ordering::Relaxed);
        std::mem::replace(&mut *slots, Vec::with_capacity(self.capacity))
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        self.appended.store(0, Ordering::Relaxed);
        slots.clear();
    }
}

/// Canonicalizes a sampled multiset: sort by `(method, location)` and drop
/// duplicates.
pub fn dedup_frames(frames: &mut Vec<CallFrame>) {
    frames.sort_unstable();
    frames.dedup();
}

thread_local! {
    // Reused across samples so the capture itself never allocates.
    static FRAME_SCRATCH: RefCell<Vec<CallFrame>> =
        RefCell::new(Vec::with_capacity(MAX_CAPTURE_FRAMES));
}

impl Profiler {
    /// Handles one sampling interrupt on the current thread.
    ///
    /// Outside an experiment the first in-scope frame is buffered as an
    /// experiment candidate. Inside an experiment the frame scan feeds the
    /// delay protocol instead: a hit inside the target region accrues the
    /// per-hit delay quantum, every tenth signal settles against the global
    /// ledger, and pending progress hits are merged into the global counter.
    pub fn on_sample(&self) {
        if !self.ready() {
            return;
        }
        let Some(thread) = super::current_thread() else {
            return;
        };

        FRAME_SCRATCH.with(|scratch| {
            let mut frames = scratch.borrow_mut();
            frames.clear();
            let count = self.host.capture_stack(MAX_CAPTURE_FRAMES, &mut frames);
            if count < 0 {
                if -count > KNOWN_STACK_ERRORS {
                    return;
                }
                // Recognized failure: proceed with an empty trace so the
                // in-experiment bookkeeping below still runs.
                frames.clear();
            }

            if !self.in_experiment() {
                thread.local_delay.store(0, Ordering::Relaxed);
                let in_scope = self.in_scope.lock();
                for frame in frames.iter() {
                    if in_scope.contains(&frame.method) {
                        self.buffer.push(*frame);
                        break;
                    }
                }
                return;
            }

            let signals = thread.signals_received.fetch_add(1, Ordering::Relaxed) + 1;
            {
                let current = self.current.read();
                if let Some(experiment) = current.as_ref() {
                    for frame in frames.iter() {
                        if experiment.contains(frame) {
                            thread
                                .local_delay
                                .fetch_add(experiment.delay, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            }

            if signals >= SETTLE_SIGNAL_INTERVAL {
                self.ledger.settle(&thread.local_delay);
                thread.signals_received.store(0, Ordering::Relaxed);
            }

            let pending = thread.points_hit.swap(0, Ordering::Relaxed);
            if pending > 0 {
                self.points_hit.fetch_add(pending, Ordering::Relaxed);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MethodId;

    fn frame(method: u64, location: i32) -> CallFrame {
        CallFrame { method: MethodId(method), location }
    }

    #[test]
    fn overflow_is_dropped_but_index_advances() {
        let buffer = SampleBuffer::new(4);
        for i in 0..10 {
            buffer.push(frame(i, 0));
        }
        assert_eq!(buffer.appended.load(Ordering::Relaxed), 10);
        let drained = buffer.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(buffer.appended.load(Ordering::Relaxed), 0);

        buffer.push(frame(99, 1));
        assert_eq!(buffer.drain(), vec![frame(99, 1)]);
    }

    #[test]
    fn dedup_keeps_each_pair_once() {
        let mut frames = vec![
            frame(2, 10),
            frame(1, 5),
            frame(2, 10),
            frame(1, 7),
            frame(1, 5),
            frame(2, 10),
        ];
        dedup_frames(&mut frames);
        assert_eq!(frames, vec![frame(1, 5), frame(1, 7), frame(2, 10)]);
    }

    #[test]
    fn dedup_size_matches_distinct_pairs() {
        use std::collections::BTreeSet;
        let mut frames = Vec::new();
        for method in 0..8u64 {
            for location in 0..4 {
                for _ in 0..(method + 1) {
                    frames.push(frame(method, location));
                }
            }
        }
        let distinct: BTreeSet<CallFrame> = frames.iter().copied().collect();
        dedup_frames(&mut frames);
        assert_eq!(frames.len(), distinct.len());
    }
}
