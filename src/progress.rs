//! Progress-point resolution and lifetime.
//!
//! The configured `class:line` pair is resolved at most once, to the first
//! prepared method whose line-number table contains the line; a breakpoint is
//! installed there and every later class-prepare for the same name is a
//! no-op. In end-to-end mode nothing is resolved or installed: the single
//! progress hit is injected by the outer driver at scenario completion.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProfilerOptions;
use crate::error::{ProfilerError, ProfilerResult};
use crate::host::{HostRuntime, MethodId};

/// A resolved progress point: concrete method, breakpoint location, and the
/// source line it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPoint {
    pub method: MethodId,
    pub location: i32,
    pub line: i32,
}

#[derive(Debug)]
pub struct ProgressTracker {
    /// Configured class in signature-prefix form (`Lpkg/Name`).
    class: Option<String>,
    line: Option<i32>,
    end_to_end: bool,
    resolved: Mutex<Option<ProgressPoint>>,
}

impl ProgressTracker {
    pub fn from_options(options: &ProfilerOptions) -> Self {
        Self {
            class: options.progress_class.clone(),
            line: options.progress_line,
            end_to_end: options.end_to_end,
            resolved: Mutex::new(None),
        }
    }

    pub fn resolved(&self) -> Option<ProgressPoint> {
        *self.resolved.lock()
    }

    /// True when `signature` names exactly the configured progress class and
    /// the point still needs resolving. The cheap prefix test runs first
    /// because it fails for almost every prepared class.
    pub fn matches_class(&self, signature: &str) -> bool {
        if self.end_to_end || self.resolved.lock().is_some() {
            return false;
        }
        let Some(class) = self.class.as_deref() else {
            return false;
        };
        if !signature.starts_with(class) {
            return false;
        }
        signature.strip_suffix(';') == Some(class)
    }

    /// Scans the matching class's methods for the configured line and
    /// installs the breakpoint at the first hit. Failing to find the line in
    /// the class that was supposed to contain it is fatal: continuing would
    /// profile against a progress point that never fires.
    pub fn try_resolve(
        &self,
        host: &dyn HostRuntime,
        methods: &[MethodId],
    ) -> ProfilerResult<()> {
        let Some(line) = self.line else {
            return Ok(());
        };
        let mut resolved = self.resolved.lock();
        if resolved.is_some() {
            return Ok(());
        }
        for &method in methods {
            let entries = match host.line_number_table(method) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(?method, %err, "skipping method without line table");
                    continue;
                }
            };
            for entry in entries {
                if entry.line_number == line {
                    host.set_breakpoint(method, entry.start_location)?;
                    *resolved = Some(ProgressPoint {
                        method,
                        location: entry.start_location,
                        line,
                    });
                    info!(?method, location = entry.start_location, line, "progress point set");
                    return Ok(());
                }
            }
        }
        Err(ProfilerError::ProgressPointUnresolved(line))
    }

    /// Removes the installed breakpoint at shutdown.
    pub fn clear(&self, host: &dyn HostRuntime) {
        if self.end_to_end {
            return;
        }
        if let Some(point) = self.resolved.lock().take() {
            info!("clearing progress point");
            if let Err(err) = host.clear_breakpoint(point.method, point.location) {
                warn!(%err, "failed to clear progress breakpoint");
            }
        }
    }
}
