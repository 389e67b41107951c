//! A causal profiler engine for managed runtimes.
//!
//! The engine estimates how much overall throughput (measured at a
//! user-chosen progress point) would improve if one source line were made
//! faster, without actually optimizing it. It runs randomized experiments
//! that virtually slow down every thread not executing the selected line and
//! measures the change in progress-point throughput, appending one CSV row
//! per completed trial.
//!
//! The host runtime is abstracted behind [`host::HostRuntime`]; a software
//! implementation lives in [`sim`] for tests and the simulation driver.

pub mod config;
pub mod engine;
pub mod error;
pub mod hits;
pub mod host;
pub mod output;
pub mod progress;
pub mod scope;
pub mod sim;

pub use config::{LogLevel, ProfilerOptions};
pub use engine::{Profiler, SchedulerHandle};
pub use error::{ConfigError, ProfilerError, ProfilerResult};
pub use host::{CallFrame, ClassInfo, HostError, HostRuntime, HostThreadId, LineEntry, MethodId};
pub use scope::ScopeFilter;
