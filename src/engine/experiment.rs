//! Experiment state, the randomized speedup distribution, and the adaptive
//! duration controller.

use std::time::Duration;

use rand::Rng;

use crate::host::{CallFrame, LineEntry, MethodId, MAX_BCI};

/// Shortest and longest adaptive trial lengths.
pub const MIN_EXPERIMENT_MS: u64 = 100;
pub const MAX_EXPERIMENT_MS: u64 = 30_000;
/// Multiplicative step for growing/shrinking the trial length.
const EXPERIMENT_TIME_FACTOR: u64 = 2;
/// Trials with this many hits or fewer are too short to be informative.
pub const LOW_HIT_THRESHOLD: u64 = 5;
/// Trials with this many hits or more can afford to shrink.
pub const HIGH_HIT_THRESHOLD: u64 = 20;

/// The active trial: one target line at one virtual speedup.
///
/// Exactly one experiment is active process-wide at a time; it is fully
/// constructed before being published to the sampling threads.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub method: MethodId,
    /// Bytecode index of the sampled frame that selected this line.
    pub bci: i32,
    pub line: i32,
    /// Bytecode ranges (exclusive end) that all map to `line`.
    pub ranges: Vec<(i32, i32)>,
    /// Quantized virtual speedup in [0, 1].
    pub speedup: f32,
    /// Virtual slowdown quantum per in-region sample, in nanoseconds.
    pub delay: i64,
}

impl Experiment {
    /// True when the frame sits inside the target method and one of the
    /// line's bytecode ranges.
    pub fn contains(&self, frame: &CallFrame) -> bool {
        if frame.method != self.method {
            return false;
        }
        self.ranges
            .iter()
            .any(|&(start, end)| frame.location >= start && frame.location < end)
    }
}

/// Draws a quantized speedup: 20% of trials get exactly 0 (the baseline the
/// other trials are interpreted against), the rest are uniform over
/// {0.05, 0.10, ..., 1.00}.
pub fn draw_speedup<R: Rng>(rng: &mut R) -> f32 {
    let raw = rng.gen_range(0..25);
    if raw < 5 {
        0.0
    } else {
        (raw - 4) as f32 / 20.0
    }
}

/// Source line for a bytecode index: the table entry whose range covers it.
pub fn line_for_location(entries: &[LineEntry], location: i32) -> Option<i32> {
    if entries.is_empty() {
        return None;
    }
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].start_location > location {
            return Some(entries[i - 1].line_number);
        }
    }
    None
}

/// All bytecode ranges mapping to `line`. Each range runs to the next table
/// entry's start, or past the maximum bytecode index for the last entry.
pub fn ranges_for_line(entries: &[LineEntry], line: i32) -> Vec<(i32, i32)> {
    let mut ranges = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.line_number == line {
            let end = if i + 1 < entries.len() {
                entries[i + 1].start_location
            } else {
                MAX_BCI + 1
            };
            ranges.push((entry.start_location, end));
        }
    }
    ranges
}

/// Keeps each trial's hit count inside a target band regardless of workload
/// speed: grow when trials see too few progress hits, shrink when they see
/// plenty and the length is above the minimum.
#[derive(Debug)]
pub struct DurationController {
    millis: u64,
    fixed: bool,
}

impl DurationController {
    pub fn new(fixed: bool) -> Self {
        Self { millis: MIN_EXPERIMENT_MS, fixed }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.millis)
    }

    pub fn current_millis(&self) -> u64 {
        self.millis
    }

    pub fn observe(&mut self, points_hit: u64) {
        if self.fixed {
            return;
        }
        if points_hit <= LOW_HIT_THRESHOLD {
            if self.millis * EXPERIMENT_TIME_FACTOR > MAX_EXPERIMENT_MS {
                self.millis = MAX_EXPERIMENT_MS;
            } else {
                self.millis *= EXPERIMENT_TIME_FACTOR;
            }
        } else if self.millis > MIN_EXPERIMENT_MS && points_hit >= HIGH_HIT_THRESHOLD {
            self.millis /= EXPERIMENT_TIME_FACTOR;
        }
    }
}
