//! # stackprof - Main Entry Point
//!
//! Loads the eBPF sampler, then runs one aggregation cycle per `--duration`
//! seconds until Ctrl+C, the cycle limit, or the exit of the target process.
//! An interrupted run still flushes the samples gathered since the last tick.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::Path;
use tokio::time::MissedTickBehavior;

use stackprof::aggregation::{CyclePipeline, CycleStats};
use stackprof::cli::Args;
use stackprof::domain::Pid;
use stackprof::export::sink_for;
use stackprof::preflight::{run_preflight_checks, PreflightTargets};
use stackprof::profiling::{
    attach_cpu_sampler, cgroup_id, configure_filters, init_ebpf_logger, load_ebpf_program,
    take_tables, SampleFilter,
};
use stackprof::symbolization::KallsymsFile;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("invalid cgroup") || msg.contains("cgroup directory not found") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Why the sampling loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Interrupted,
    CycleLimit,
    ProcessExited,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            ExitReason::Interrupted => "interrupted",
            ExitReason::CycleLimit => "cycle limit reached",
            ExitReason::ProcessExited => "process exited",
        }
    }

    /// Whether samples collected since the last tick still need a cycle
    fn needs_final_flush(self) -> bool {
        self != ExitReason::CycleLimit
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let target_pid = args.target_pid();

    run_preflight_checks(
        &PreflightTargets { pid: target_pid, cgroup: args.cgroup.as_deref(), kallsyms: &args.kallsyms },
        quiet,
    )?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory {}", args.out_dir.display()))?;

    let config = args.pipeline_config();
    if !quiet {
        println!("stackprof v{}", env!("CARGO_PKG_VERSION"));
        match target_pid {
            Some(pid) => println!("pid: {}", pid.0),
            None => println!("pid: all"),
        }
        println!("sampling: {} Hz, cycle: {}s", config.sample_frequency, args.duration);
        println!(
            "output: {} ({}, {} scope)",
            args.out_dir.display(),
            config.partitioning.label(),
            config.scope.label()
        );
    }

    // ── Load eBPF and start sampling ────────────────────────────────────
    let mut bpf = load_ebpf_program(&args.bpf_object)?;
    init_ebpf_logger(&mut bpf);

    let filter = SampleFilter {
        pid: target_pid,
        cgroup_id: args.cgroup.as_deref().map(cgroup_id).transpose()?,
    };
    configure_filters(&mut bpf, &filter)?;
    let cpus = attach_cpu_sampler(&mut bpf, config.sample_frequency)?;
    let (mut counts, mut stacks) = take_tables(&mut bpf)?;

    if !quiet {
        println!("CPUs: {cpus}");
        println!("Press Ctrl+C to stop\n");
    }

    let mut sink = sink_for(args.format, args.out_dir.clone());
    let mut pipeline = CyclePipeline::new(config, Box::new(KallsymsFile::new(&args.kallsyms)));

    let mut ticker = tokio::time::interval(args.cycle_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut totals = CycleStats::default();
    let exit_reason = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => break ExitReason::Interrupted,
        }

        let stats = pipeline.run_cycle(&mut counts, &mut stacks, sink.as_mut()).await;
        report_cycle(pipeline.cycles(), &stats, quiet);
        accumulate(&mut totals, &stats);

        if args.cycle_limit().is_some_and(|limit| pipeline.cycles() >= limit) {
            break ExitReason::CycleLimit;
        }
        if target_pid.is_some_and(|pid| !process_alive(pid)) {
            break ExitReason::ProcessExited;
        }
    };

    info!("Stopping: {}", exit_reason.as_str());
    if exit_reason.needs_final_flush() {
        let stats = pipeline.run_cycle(&mut counts, &mut stacks, sink.as_mut()).await;
        report_cycle(pipeline.cycles(), &stats, quiet);
        accumulate(&mut totals, &stats);
    }

    if !quiet {
        eprintln!(
            "\n{}: {} cycles, {} profiles written, {} samples",
            exit_reason.as_str(),
            pipeline.cycles(),
            totals.profiles_written,
            totals.samples
        );
    }

    Ok(())
}

fn report_cycle(cycle: u64, stats: &CycleStats, quiet: bool) {
    if !quiet {
        println!("cycle {cycle}: {stats}");
    }
}

fn accumulate(totals: &mut CycleStats, stats: &CycleStats) {
    totals.samples += stats.samples;
    totals.profiles_written += stats.profiles_written;
}

fn process_alive(pid: Pid) -> bool {
    Path::new(&format!("/proc/{}", pid.0)).exists()
}
