//! The experiment engine: one process-scoped context object coordinating the
//! sampling threads, the delay protocol, and the scheduler thread.
//!
//! The host runtime drives the engine through the event entry points
//! (`on_thread_start`, `on_thread_end`, `on_class_prepare`, `on_breakpoint`,
//! `on_sample`); the engine drives the host back through the
//! [`HostRuntime`] trait. All cross-thread state lives in this context and is
//! guarded either by one short-critical-section lock per structure or by a
//! single atomic word.

pub mod delay;
pub mod experiment;
pub mod registry;
pub mod sampler;
mod scheduler;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::config::ProfilerOptions;
use crate::error::{ProfilerError, ProfilerResult};
use crate::hits::HitTally;
use crate::host::{ClassInfo, HostError, HostRuntime, HostThreadId, MethodId};
use crate::output::CsvSink;
use crate::progress::{ProgressPoint, ProgressTracker};
use crate::scope::ScopeFilter;

use delay::DelayLedger;
use experiment::Experiment;
use registry::{ProfiledThread, ThreadRegistry};
use sampler::SampleBuffer;

/// Interval between sampling interrupts, in nanoseconds.
pub const SAMPLE_PERIOD_NS: u64 = 1_000_000;
/// Sampling phase budget, in sampling periods.
pub const SAMPLE_BUDGET_PERIODS: u64 = 30;
/// Upper bound on frames captured per stack walk.
pub const MAX_CAPTURE_FRAMES: usize = 128;
/// Capacity of the shared candidate-frame buffer.
pub const FRAME_BUFFER_CAPACITY: usize = 2_048;
/// Largest recognized stack-walk error code; anything beyond it aborts the
/// sample.
pub const KNOWN_STACK_ERRORS: i32 = 10;
/// A thread settles its delay balance every this many in-experiment signals.
pub const SETTLE_SIGNAL_INTERVAL: u32 = 10;

/// Thread group whose members are profiled; runtime-internal helper groups
/// are excluded to avoid sampling noise and self-interference.
pub const MAIN_THREAD_GROUP: &str = "main";

thread_local! {
    static CURRENT_THREAD: RefCell<Option<Arc<ProfiledThread>>> = const { RefCell::new(None) };
}

pub(crate) fn current_thread() -> Option<Arc<ProfiledThread>> {
    CURRENT_THREAD.with(|slot| slot.borrow().clone())
}

/// The profiler engine context.
pub struct Profiler {
    pub(crate) host: Arc<dyn HostRuntime>,
    pub(crate) options: ProfilerOptions,
    pub(crate) scope: ScopeFilter,
    pub(crate) registry: ThreadRegistry,
    pub(crate) buffer: SampleBuffer,
    pub(crate) in_scope: Mutex<HashSet<MethodId>>,
    pub(crate) ledger: DelayLedger,
    /// Progress hits observed during the active experiment.
    pub(crate) points_hit: AtomicU64,
    /// Release-stored after the experiment is fully published; a sampling
    /// thread that observes `true` never sees a half-built experiment.
    in_experiment: AtomicBool,
    pub(crate) current: RwLock<Option<Experiment>>,
    running: AtomicBool,
    /// Samples delivered before the registry and scope data exist are
    /// ignored; set once the scheduler thread finishes warmup.
    ready: AtomicBool,
    done: AtomicBool,
    /// Serializes class-prepare handling.
    class_prepare_lock: Mutex<()>,
    pub(crate) progress: ProgressTracker,
    pub(crate) sink: CsvSink,
    pub(crate) tally: HitTally,
    pub(crate) base_seed: u64,
}

impl Profiler {
    /// Builds the engine from a validated configuration. Opens the output
    /// sink (appending the CSV header) before any experiment can run.
    pub fn new(host: Arc<dyn HostRuntime>, options: ProfilerOptions) -> ProfilerResult<Arc<Self>> {
        options.validate()?;
        let sink = CsvSink::create(&options.output_file)?;
        let scope = ScopeFilter::new(
            options.search_scopes.clone(),
            options.ignored_scopes.clone(),
        );
        let progress = ProgressTracker::from_options(&options);
        let base_seed = options.seed.unwrap_or_else(rand::random);
        info!(
            search_scopes = ?options.search_scopes,
            ignored_scopes = ?options.ignored_scopes,
            progress_class = ?options.progress_class,
            progress_line = ?options.progress_line,
            warmup_ms = options.warmup.as_millis() as u64,
            end_to_end = options.end_to_end,
            fixed_duration = options.fixed_duration,
            output = %options.output_file.display(),
            "profiler configured"
        );
        Ok(Arc::new(Self {
            host,
            scope,
            registry: ThreadRegistry::new(),
            buffer: SampleBuffer::new(FRAME_BUFFER_CAPACITY),
            in_scope: Mutex::new(HashSet::new()),
            ledger: DelayLedger::new(),
            points_hit: AtomicU64::new(0),
            in_experiment: AtomicBool::new(false),
            current: RwLock::new(None),
            running: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            done: AtomicBool::new(false),
            class_prepare_lock: Mutex::new(()),
            progress,
            sink,
            tally: HitTally::new(),
            base_seed,
            options,
        }))
    }

    /// Marks the engine running, primes already-loaded classes through the
    /// class-prepare path, and launches the scheduler thread.
    ///
    /// A missing host capability disables profiling; the caller logs it and
    /// the host process continues unaffected.
    pub fn start(self: &Arc<Self>) -> ProfilerResult<SchedulerHandle> {
        if let Err(err) = self.host.ensure_capabilities() {
            error!(%err, "host lacks required capabilities; profiling disabled");
            return Err(ProfilerError::Capability(err));
        }
        info!("starting profiler");
        // Priming runs through the class-prepare path, which requires the
        // running flag; roll it back if startup fails so the engine is not
        // left claiming to run with no scheduler behind it.
        self.running.store(true, Ordering::Release);
        match self.launch() {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn launch(self: &Arc<Self>) -> ProfilerResult<SchedulerHandle> {
        for class in self.host.loaded_classes() {
            self.on_class_prepare(&class)?;
        }
        let profiler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("jcoz-scheduler".to_string())
            .spawn(move || scheduler::run(profiler))?;
        Ok(SchedulerHandle { profiler: Arc::clone(self), handle: Some(handle) })
    }

    /// Stops profiling: flips the running flag, waits for the scheduler to
    /// finish its current cycle, and tears down scope data and the progress
    /// breakpoint. An in-flight trial is discarded, never recorded.
    pub fn stop(&self) {
        info!("stopping profiler");
        if self.running.load(Ordering::Acquire) {
            if self.options.end_to_end {
                // The scenario completing is the one and only progress hit.
                self.points_hit.fetch_add(1, Ordering::Relaxed);
            }
            self.running.store(false, Ordering::Release);
            while !self.done.load(Ordering::Acquire) {
                thread::yield_now();
            }
        }
        for line in self.tally.dump() {
            info!("{line}");
        }
        self.in_scope.lock().clear();
        self.progress.clear(self.host.as_ref());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reports that the end-to-end scenario finished, which counts as the
    /// single progress hit of the in-flight trial. Lets the trial record
    /// itself before [`Profiler::stop`] discards whatever is still running.
    pub fn complete_scenario(&self) {
        if self.options.end_to_end {
            self.points_hit.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn in_experiment(&self) -> bool {
        self.in_experiment.load(Ordering::Acquire)
    }

    /// Publishes a fully-built experiment and then flips the active flag
    /// with release ordering.
    pub(crate) fn activate_experiment(&self, experiment: Experiment) {
        self.points_hit.store(0, Ordering::Relaxed);
        self.ledger.reset();
        *self.current.write() = Some(experiment);
        self.in_experiment.store(true, Ordering::Release);
    }

    pub(crate) fn deactivate_experiment(&self) {
        self.in_experiment.store(false, Ordering::Release);
    }

    /// Broadcasts one sampling interrupt to every registered thread.
    pub(crate) fn signal_profiled_threads(&self) {
        self.registry.for_each(|thread| self.host.interrupt(thread.host_id));
    }

    /// Number of currently registered profiled threads.
    pub fn profiled_thread_count(&self) -> usize {
        self.registry.len()
    }

    /// The resolved progress point, if any.
    pub fn progress_point(&self) -> Option<ProgressPoint> {
        self.progress.resolved()
    }

    /// Thread-start notification, delivered on the started thread itself.
    /// Threads outside the main group are left unregistered.
    pub fn on_thread_start(&self, thread: HostThreadId) -> ProfilerResult<()> {
        match self.host.thread_group(thread) {
            Ok(group) if group == MAIN_THREAD_GROUP => {
                debug!(?thread, "registering profiled thread");
                let profiled = Arc::new(ProfiledThread::new(thread, self.ledger.total()));
                self.registry.register(Arc::clone(&profiled));
                CURRENT_THREAD.with(|slot| *slot.borrow_mut() = Some(profiled));
                Ok(())
            }
            Ok(_) | Err(HostError::WrongPhase) => {
                CURRENT_THREAD.with(|slot| *slot.borrow_mut() = None);
                Ok(())
            }
            Err(err) => {
                error!(%err, "unrecoverable thread group lookup failure");
                Err(ProfilerError::Host(err))
            }
        }
    }

    /// Thread-end notification, delivered on the ending thread itself.
    /// Pending hits merge into the global counter and any delay skew is
    /// settled before the thread's state is discarded.
    pub fn on_thread_end(&self) {
        let Some(profiled) = CURRENT_THREAD.with(|slot| slot.borrow_mut().take()) else {
            return;
        };
        debug!(thread = ?profiled.host_id, "removing profiled thread");
        let pending = profiled.points_hit.swap(0, Ordering::Relaxed);
        if pending > 0 {
            self.points_hit.fetch_add(pending, Ordering::Relaxed);
        }
        self.ledger.settle(&profiled.local_delay);
        self.registry.unregister(&profiled);
    }

    /// Class-prepare notification. In-scope methods join the sampling set;
    /// the progress point resolves on its exact class.
    pub fn on_class_prepare(&self, class: &ClassInfo) -> ProfilerResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        let _guard = self.class_prepare_lock.lock();
        if self.scope.is_in_scope(&class.signature) {
            debug!(
                class = %class.signature,
                count = class.methods.len(),
                "adding in-scope methods"
            );
            self.in_scope.lock().extend(class.methods.iter().copied());
        }
        if self.progress.matches_class(&class.signature) {
            self.progress.try_resolve(self.host.as_ref(), &class.methods)?;
        }
        Ok(())
    }

    /// Progress-point breakpoint hit, delivered on the hitting thread. Hits
    /// only count while an experiment is active.
    pub fn on_breakpoint(&self) {
        if let Some(profiled) = current_thread() {
            if self.in_experiment.load(Ordering::Relaxed) {
                profiled.points_hit.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Owns the scheduler thread; stops the engine and joins on drop.
pub struct SchedulerHandle {
    profiler: Arc<Profiler>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("joined", &self.handle.is_none())
            .finish()
    }
}

impl SchedulerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.profiler.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
