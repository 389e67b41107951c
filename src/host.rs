//! The instrumentation boundary between the engine and the managed runtime.
//!
//! The engine never talks to a runtime directly; it calls through
//! [`HostRuntime`], which supplies stack sampling, line-number tables,
//! breakpoints, and thread/class metadata. Every call is allowed to fail and
//! failures are treated as "no data this round" unless noted otherwise on the
//! method. [`crate::sim::SimHost`] is the in-crate implementation used by
//! tests and the simulation driver.

use thiserror::Error;

/// Opaque method identity handed out by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u64);

/// Opaque identity of a host-managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostThreadId(pub u64);

/// One sampled frame: a method plus a bytecode index within it.
///
/// Ordering is on the `(method, location)` pair and exists only so sampled
/// frames can be canonicalized and deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallFrame {
    pub method: MethodId,
    pub location: i32,
}

/// One entry of a method's line-number table: the first bytecode index
/// mapping to `line_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub start_location: i32,
    pub line_number: i32,
}

/// Largest bytecode index a method can contain.
pub const MAX_BCI: i32 = 65_535;

/// A prepared class as reported by the host: its signature (`Lpkg/Name;`
/// form) and the methods it declares.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub signature: String,
    pub methods: Vec<MethodId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    /// The call was made during a phase where the host cannot answer yet.
    #[error("call made outside the live phase")]
    WrongPhase,
    /// The requested information does not exist (e.g. a native method has no
    /// line-number table).
    #[error("requested information is absent")]
    AbsentInformation,
    #[error("host call failed with code {0}")]
    Failed(i32),
}

/// Black-box interface to the host runtime's instrumentation surface.
///
/// Implementations must be callable from any profiled thread. The engine
/// tolerates any of these calls failing; only [`ensure_capabilities`]
/// failures and unrecoverable thread-metadata errors abort profiling.
///
/// [`ensure_capabilities`]: HostRuntime::ensure_capabilities
pub trait HostRuntime: Send + Sync {
    /// Verify that the host grants everything the profiler needs (sampling,
    /// line numbers, breakpoints). Called once before profiling starts.
    fn ensure_capabilities(&self) -> Result<(), HostError>;

    /// Capture the calling thread's stack, outermost-scanned frame first,
    /// appending at most `max_frames` frames to `out`.
    ///
    /// Returns the number of frames captured, or a negative error code.
    /// Must be async-interrupt-safe: no allocation beyond `out`'s existing
    /// capacity, no blocking, bounded time.
    fn capture_stack(&self, max_frames: usize, out: &mut Vec<CallFrame>) -> i32;

    /// Deliver a sampling interrupt to `thread`. The host arranges for that
    /// thread to invoke [`crate::engine::Profiler::on_sample`] promptly.
    fn interrupt(&self, thread: HostThreadId);

    /// Line-number table for a method, ordered by `start_location`.
    fn line_number_table(&self, method: MethodId) -> Result<Vec<LineEntry>, HostError>;

    /// Signature (`Lpkg/Name;` form) of the class declaring `method`.
    fn declaring_class_signature(&self, method: MethodId) -> Result<String, HostError>;

    /// Name of the thread group the given thread belongs to.
    fn thread_group(&self, thread: HostThreadId) -> Result<String, HostError>;

    fn set_breakpoint(&self, method: MethodId, location: i32) -> Result<(), HostError>;

    fn clear_breakpoint(&self, method: MethodId, location: i32) -> Result<(), HostError>;

    /// Snapshot of classes already prepared before the profiler attached.
    fn loaded_classes(&self) -> Vec<ClassInfo>;
}
