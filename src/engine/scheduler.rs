//! The experiment scheduler: a dedicated thread looping through
//! sampling, target selection, the timed experiment, and result recording
//! until the engine is stopped.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::host::{CallFrame, LineEntry};
use crate::scope::clean_signature;

use super::delay::sleep_exact;
use super::experiment::{
    draw_speedup, line_for_location, ranges_for_line, DurationController, Experiment,
};
use super::sampler::dedup_frames;
use super::{Profiler, SAMPLE_BUDGET_PERIODS, SAMPLE_PERIOD_NS};

pub(crate) fn run(profiler: Arc<Profiler>) {
    if !profiler.options.warmup.is_zero() {
        debug!(warmup_ms = profiler.options.warmup.as_millis() as u64, "warming up");
        std::thread::sleep(profiler.options.warmup);
    }
    profiler.mark_ready();

    let mut controller = DurationController::new(profiler.options.fixed_duration);
    let mut iteration: u64 = 0;
    while profiler.is_running() {
        iteration += 1;
        // One locally-seeded generator per iteration keeps trials
        // reproducible for a fixed base seed.
        let mut rng = StdRng::seed_from_u64(profiler.base_seed.wrapping_add(iteration));

        if !sample_round(&profiler, &mut rng) {
            break;
        }

        let mut frames = profiler.buffer.drain();
        if frames.is_empty() {
            debug!("no frames sampled; trying sampling loop again");
            continue;
        }
        trace!(count = frames.len(), "collected candidate frames");
        dedup_frames(&mut frames);
        frames.shuffle(&mut rng);

        let Some((frame, entries)) = resolve_candidate(&profiler, &frames) else {
            debug!("no sampled frame resolved a line table; sampling again");
            profiler.buffer.clear();
            continue;
        };
        let Some(line) = line_for_location(&entries, frame.location) else {
            continue;
        };
        let ranges = ranges_for_line(&entries, line);

        let speedup = profiler
            .options
            .speedup_override
            .unwrap_or_else(|| draw_speedup(&mut rng));
        let experiment = Experiment {
            method: frame.method,
            bci: frame.location,
            line,
            ranges,
            speedup,
            delay: (f64::from(speedup) * SAMPLE_PERIOD_NS as f64) as i64,
        };
        run_experiment(&profiler, experiment, &mut controller);

        profiler.buffer.clear();
    }

    info!("profiler scheduler finished");
    profiler.mark_done();
}

/// Broadcasts sampling interrupts at randomized intervals centered on the
/// signal period until the sampling budget is spent. Returns false when the
/// engine stopped mid-round.
fn sample_round(profiler: &Profiler, rng: &mut StdRng) -> bool {
    let needed = SAMPLE_BUDGET_PERIODS * SAMPLE_PERIOD_NS;
    let mut accrued = 0u64;
    while accrued < needed {
        if !profiler.is_running() {
            return false;
        }
        // Randomized to avoid periodicity bias against the workload.
        let nanos = 2 * SAMPLE_PERIOD_NS - rng.gen_range(0..SAMPLE_PERIOD_NS);
        sleep_exact(nanos as i64);
        profiler.signal_profiled_threads();
        accrued += nanos;
    }
    true
}

/// First shuffled candidate whose line-number table resolves. Lookup
/// failures are expected under concurrent class loading and just skip the
/// candidate.
fn resolve_candidate(
    profiler: &Profiler,
    frames: &[CallFrame],
) -> Option<(CallFrame, Vec<LineEntry>)> {
    for frame in frames {
        match profiler.host.line_number_table(frame.method) {
            Ok(entries) if !entries.is_empty() => return Some((*frame, entries)),
            Ok(_) => continue,
            Err(err) => {
                trace!(method = ?frame.method, %err, "line table lookup failed");
                continue;
            }
        }
    }
    None
}

/// Runs one timed trial and records its outcome. A trial interrupted by
/// shutdown is discarded; a trial whose class signature no longer resolves
/// is thrown out as a bad sample.
fn run_experiment(profiler: &Profiler, experiment: Experiment, controller: &mut DurationController) {
    let end_to_end = profiler.options.end_to_end;
    let method = experiment.method;
    let bci = experiment.bci;
    let line = experiment.line;
    let speedup = experiment.speedup;
    info!(?method, line, speedup, "running experiment");

    profiler.activate_experiment(experiment);

    let start = Instant::now();
    let deadline = start + controller.current();
    loop {
        if !profiler.is_running() {
            break;
        }
        let points = profiler.points_hit.load(std::sync::atomic::Ordering::Relaxed);
        if !((end_to_end && points == 0) || Instant::now() < deadline) {
            break;
        }
        sleep_exact(SAMPLE_PERIOD_NS as i64);
        profiler.signal_profiled_threads();
    }

    // One more round so every thread observes the deactivation and settles
    // its ledger a final time before the next experiment.
    sleep_exact(SAMPLE_PERIOD_NS as i64);
    profiler.deactivate_experiment();
    profiler.signal_profiled_threads();
    sleep_exact(SAMPLE_PERIOD_NS as i64);

    // Drop the published experiment (and its range list) either way.
    profiler.current.write().take();

    if !profiler.is_running() {
        debug!("profiler stopped mid-experiment; discarding trial");
        return;
    }

    let duration = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
    let delay = profiler.ledger.total();
    let points_hit = profiler
        .points_hit
        .swap(0, std::sync::atomic::Ordering::Relaxed);
    profiler.ledger.reset();

    let signature = match profiler.host.declaring_class_signature(method) {
        Ok(signature) => signature,
        Err(err) => {
            debug!(?method, %err, "discarding trial: class signature lookup failed");
            return;
        }
    };
    let class = clean_signature(&signature);

    controller.observe(points_hit);
    profiler.tally.record(&class, line, bci);

    let effective = duration - delay;
    info!(
        class = %class,
        line,
        speedup,
        points_hit,
        delay,
        duration,
        next_experiment_ms = controller.current_millis(),
        "ran experiment"
    );
    if let Err(err) = profiler
        .sink
        .append_row(&class, line, speedup, duration, effective, points_hit)
    {
        warn!(%err, "failed to append result row");
    }
}
