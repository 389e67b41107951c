//! Software host runtime backing the engine in tests and the simulation
//! driver.
//!
//! `SimHost` plays the role of the managed runtime's instrumentation
//! surface: synthetic classes carry line-number tables, worker threads run
//! synthetic workloads that publish their "stack" before every step, poll
//! for sampling interrupts, and execute the progress line at a configurable
//! cadence. Sampling delivery is cooperative: an interrupt sets a per-thread
//! flag and the worker invokes the engine's sample entry point at its next
//! step, which is the explicit-callback model the engine is specified
//! against.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::engine::{Profiler, MAIN_THREAD_GROUP};
use crate::host::{
    CallFrame, ClassInfo, HostError, HostRuntime, HostThreadId, LineEntry, MethodId,
};

#[derive(Debug, Clone)]
pub struct SimMethod {
    pub id: MethodId,
    pub line_table: Vec<LineEntry>,
}

#[derive(Debug, Clone)]
pub struct SimClass {
    pub signature: String,
    pub methods: Vec<SimMethod>,
}

thread_local! {
    static CURRENT_STACK: RefCell<Vec<CallFrame>> = const { RefCell::new(Vec::new()) };
}

/// In-process stand-in for a managed runtime's instrumentation interface.
#[derive(Debug, Default)]
pub struct SimHost {
    classes: RwLock<Vec<SimClass>>,
    interrupts: Mutex<HashMap<u64, Arc<AtomicBool>>>,
    groups: Mutex<HashMap<u64, String>>,
    breakpoints: Mutex<HashSet<(MethodId, i32)>>,
    next_thread: AtomicU64,
    /// When set, every stack walk fails with this code.
    stack_error: Mutex<Option<i32>>,
    missing_capabilities: bool,
}

impl SimHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A host that refuses the capability check, for exercising the
    /// profiling-disabled path.
    pub fn without_capabilities() -> Arc<Self> {
        Arc::new(Self { missing_capabilities: true, ..Self::default() })
    }

    pub fn add_class(&self, class: SimClass) {
        self.classes.write().push(class);
    }

    /// Registers the calling thread with the host under `group` and returns
    /// its interrupt token.
    pub fn attach_thread(&self, group: &str) -> SimThread {
        let id = self.next_thread.fetch_add(1, Ordering::Relaxed) + 1;
        let flag = Arc::new(AtomicBool::new(false));
        self.interrupts.lock().insert(id, Arc::clone(&flag));
        self.groups.lock().insert(id, group.to_string());
        SimThread { id: HostThreadId(id), interrupt: flag }
    }

    /// Publishes the calling thread's current stack, innermost frame first.
    pub fn publish_stack(frames: &[CallFrame]) {
        CURRENT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.clear();
            stack.extend_from_slice(frames);
        });
    }

    pub fn has_breakpoint(&self, method: MethodId, location: i32) -> bool {
        self.breakpoints.lock().contains(&(method, location))
    }

    pub fn set_stack_error(&self, code: Option<i32>) {
        *self.stack_error.lock() = code;
    }
}

impl HostRuntime for SimHost {
    fn ensure_capabilities(&self) -> Result<(), HostError> {
        if self.missing_capabilities {
            Err(HostError::Failed(99))
        } else {
            Ok(())
        }
    }

    fn capture_stack(&self, max_frames: usize, out: &mut Vec<CallFrame>) -> i32 {
        if let Some(code) = *self.stack_error.lock() {
            return code;
        }
        CURRENT_STACK.with(|stack| {
            let stack = stack.borrow();
            let take = stack.len().min(max_frames);
            out.extend_from_slice(&stack[..take]);
            take as i32
        })
    }

    fn interrupt(&self, thread: HostThreadId) {
        if let Some(flag) = self.interrupts.lock().get(&thread.0) {
            flag.store(true, Ordering::Release);
        }
    }

    fn line_number_table(&self, method: MethodId) -> Result<Vec<LineEntry>, HostError> {
        for class in self.classes.read().iter() {
            for m in &class.methods {
                if m.id == method {
                    if m.line_table.is_empty() {
                        return Err(HostError::AbsentInformation);
                    }
                    return Ok(m.line_table.clone());
                }
            }
        }
        Err(HostError::AbsentInformation)
    }

    fn declaring_class_signature(&self, method: MethodId) -> Result<String, HostError> {
        for class in self.classes.read().iter() {
            if class.methods.iter().any(|m| m.id == method) {
                return Ok(class.signature.clone());
            }
        }
        Err(HostError::AbsentInformation)
    }

    fn thread_group(&self, thread: HostThreadId) -> Result<String, HostError> {
        self.groups
            .lock()
            .get(&thread.0)
            .cloned()
            .ok_or(HostError::AbsentInformation)
    }

    fn set_breakpoint(&self, method: MethodId, location: i32) -> Result<(), HostError> {
        self.breakpoints.lock().insert((method, location));
        Ok(())
    }

    fn clear_breakpoint(&self, method: MethodId, location: i32) -> Result<(), HostError> {
        self.breakpoints.lock().remove(&(method, location));
        Ok(())
    }

    fn loaded_classes(&self) -> Vec<ClassInfo> {
        self.classes
            .read()
            .iter()
            .map(|class| ClassInfo {
                signature: class.signature.clone(),
                methods: class.methods.iter().map(|m| m.id).collect(),
            })
            .collect()
    }
}

/// Interrupt token for one attached worker thread.
#[derive(Debug)]
pub struct SimThread {
    pub id: HostThreadId,
    interrupt: Arc<AtomicBool>,
}

impl SimThread {
    /// Consumes a pending sampling interrupt, if one was delivered.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::AcqRel)
    }
}

/// What one synthetic worker does with its time.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    /// Frame published while "executing" the optimizable region.
    pub target: CallFrame,
    /// Frame published the rest of the time.
    pub off_target: CallFrame,
    /// Share of steps spent in the target frame, 0..=100.
    pub target_share_percent: u64,
    /// Progress-point location this worker "executes" periodically; a hit is
    /// reported only while the breakpoint is actually installed.
    pub progress: Option<(MethodId, i32)>,
    /// Steps between progress-point executions (0 disables them).
    pub progress_interval: u64,
    /// Thread group to attach under; only `main` threads get profiled.
    pub group: String,
}

impl WorkloadSpec {
    pub fn new(target: CallFrame, off_target: CallFrame) -> Self {
        Self {
            target,
            off_target,
            target_share_percent: 50,
            progress: None,
            progress_interval: 0,
            group: MAIN_THREAD_GROUP.to_string(),
        }
    }
}

/// Body of one synthetic worker thread: attach, step until told to stop,
/// detach. Each step publishes a stack, services a pending sampling
/// interrupt, and occasionally crosses the progress line.
pub fn run_worker(
    host: Arc<SimHost>,
    profiler: Arc<Profiler>,
    spec: WorkloadSpec,
    stop: Arc<AtomicBool>,
) {
    let thread = host.attach_thread(&spec.group);
    if let Err(err) = profiler.on_thread_start(thread.id) {
        warn!(%err, "worker failed to register; exiting");
        return;
    }

    let mut step = 0u64;
    while !stop.load(Ordering::Acquire) {
        step += 1;
        let frame = if step % 100 < spec.target_share_percent {
            spec.target
        } else {
            spec.off_target
        };
        SimHost::publish_stack(&[frame]);

        if thread.take_interrupt() {
            profiler.on_sample();
        }

        if let Some((method, location)) = spec.progress {
            if spec.progress_interval > 0
                && step % spec.progress_interval == 0
                && host.has_breakpoint(method, location)
            {
                profiler.on_breakpoint();
            }
        }

        if step % 1_024 == 0 {
            std::thread::sleep(std::time::Duration::from_micros(50));
        } else {
            std::hint::spin_loop();
        }
    }

    profiler.on_thread_end();
}
