//! Simulation driver: runs the profiler engine against a synthetic workload
//! hosted by [`jcoz::sim::SimHost`] and leaves the trial rows in the
//! configured CSV file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use tracing::info;

use jcoz::engine::Profiler;
use jcoz::sim::{run_worker, SimClass, SimHost, SimMethod, WorkloadSpec};
use jcoz::{CallFrame, HostRuntime, LineEntry, MethodId, ProfilerOptions};

const WORK_METHOD: MethodId = MethodId(1);
const HELPER_METHOD: MethodId = MethodId(2);
/// Breakpoint location of the synthetic progress line (line 42).
const PROGRESS_LOCATION: i32 = 16;

#[derive(Debug, ClapParser)]
#[command(
    name = "jcoz-sim",
    about = "Runs the causal profiler engine against a synthetic workload.",
    version
)]
struct Args {
    /// Agent-style option string (underscore-delimited key=value tokens).
    /// Defaults to a configuration matching the synthetic workload.
    #[arg(long)]
    options: Option<String>,

    /// Number of synthetic worker threads.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// How long to run the workload, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    run_ms: u64,

    /// Share of worker steps spent inside the target line, 0..=100.
    #[arg(long, default_value_t = 50)]
    target_share: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let options = match &args.options {
        Some(raw) => ProfilerOptions::parse(raw).context("invalid option string")?,
        None => default_options(),
    };
    tracing_subscriber::fmt()
        .with_max_level(options.log_level.to_filter())
        .init();
    info!(
        config = %serde_json::to_string(&options).context("serialize config")?,
        "simulation configured"
    );

    let host = SimHost::new();
    host.add_class(worker_class());
    let dyn_host: Arc<dyn HostRuntime> = host.clone();
    let end_to_end = options.end_to_end;
    let output = options.output_file.clone();
    let profiler = Profiler::new(dyn_host, options).context("profiler init")?;
    let handle = match profiler.start() {
        Ok(handle) => handle,
        Err(err) => {
            // A capability failure disables profiling but must not take the
            // host down with it.
            tracing::error!(%err, "profiling disabled");
            return Ok(());
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for _ in 0..args.workers.max(1) {
        let spec = WorkloadSpec {
            target_share_percent: args.target_share.min(100),
            progress: Some((WORK_METHOD, PROGRESS_LOCATION)),
            progress_interval: 200,
            ..WorkloadSpec::new(
                CallFrame { method: WORK_METHOD, location: 8 },
                CallFrame { method: HELPER_METHOD, location: 0 },
            )
        };
        let host = Arc::clone(&host);
        let profiler = Arc::clone(&profiler);
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || run_worker(host, profiler, spec, stop)));
    }

    thread::sleep(Duration::from_millis(args.run_ms));
    if end_to_end {
        profiler.complete_scenario();
        // Let the in-flight trial observe the hit and record itself.
        thread::sleep(Duration::from_millis(200));
    }
    stop.store(true, Ordering::Release);
    for worker in workers {
        let _ = worker.join();
    }
    handle.stop();

    let rows = std::fs::read_to_string(&output)
        .map(|contents| contents.lines().count().saturating_sub(1))
        .unwrap_or(0);
    info!(rows, output = %output.display(), "simulation finished");
    Ok(())
}

fn default_options() -> ProfilerOptions {
    ProfilerOptions {
        search_scopes: vec!["sim/".to_string()],
        progress_class: Some("Lsim/Worker".to_string()),
        progress_line: Some(42),
        ..ProfilerOptions::default()
    }
}

/// The synthetic class the workload executes: a work method whose lines
/// 40-42 span three bytecode ranges (42 is the progress line) and a helper
/// method on lines 60-61.
fn worker_class() -> SimClass {
    SimClass {
        signature: "Lsim/Worker;".to_string(),
        methods: vec![
            SimMethod {
                id: WORK_METHOD,
                line_table: vec![
                    LineEntry { start_location: 0, line_number: 40 },
                    LineEntry { start_location: 8, line_number: 41 },
                    LineEntry { start_location: PROGRESS_LOCATION, line_number: 42 },
                ],
            },
            SimMethod {
                id: HELPER_METHOD,
                line_table: vec![
                    LineEntry { start_location: 0, line_number: 60 },
                    LineEntry { start_location: 10, line_number: 61 },
                ],
            },
        ],
    }
}
