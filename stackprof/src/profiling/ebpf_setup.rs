//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled sampler, writes the runtime filters and attaches it to
//! the software CPU clock on every online CPU.
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load eBPF bytecode from the built object file
//! - [`configure_filters()`] - Write target PID / cgroup into `CONFIG`
//! - [`attach_cpu_sampler()`] - Attach the `perf_event` program per CPU
//! - [`take_tables()`] - Hand `COUNTS` and `STACK_TRACES` to the pipeline

use anyhow::{Context, Result};
use aya::{
    maps::{HashMap, MapData, StackTraceMap},
    programs::{perf_event, PerfEvent},
    Ebpf,
};
use aya_log::EbpfLogger;
use log::{info, warn};
use stackprof_common::{CONFIG_TARGET_CGROUP, CONFIG_TARGET_PID, COUNT_VALUE_SIZE, SAMPLE_KEY_SIZE};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::domain::{Pid, ProfilerError};
use crate::profiling::online_cpus;
use crate::tables::bpf::{COUNTS_MAP, STACK_TRACES_MAP};
use crate::tables::{BpfCountsTable, BpfStackTable};

/// Name of the sampling program in the eBPF object
pub const SAMPLER_PROGRAM: &str = "on_cpu_sample";

/// Where `cargo xtask build-ebpf` leaves the sampler
pub const DEFAULT_BPF_OBJECT: &str = "target/bpfel-unknown-none/release/stackprof";

const CONFIG_MAP: &str = "CONFIG";

/// Which tasks the sampler records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFilter {
    pub pid: Option<Pid>,
    pub cgroup_id: Option<u64>,
}

/// Load the eBPF object built by `cargo xtask build-ebpf`
///
/// # Errors
/// Returns [`ProfilerError::EbpfLoadFailed`] if the object is missing or
/// rejected by the kernel
pub fn load_ebpf_program(path: &Path) -> Result<Ebpf> {
    let bpf = Ebpf::load_file(path).map_err(|e| {
        ProfilerError::EbpfLoadFailed(format!(
            "{}: {e}\n\nBuild it with: cargo xtask build-ebpf --release",
            path.display()
        ))
    })?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// cgroup v2 id of a cgroup directory (its inode number)
///
/// # Errors
/// Returns [`ProfilerError::InvalidCgroup`] if `path` is not a directory
pub fn cgroup_id(path: &Path) -> Result<u64, ProfilerError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ProfilerError::InvalidCgroup { path: path.to_path_buf(), reason: e.to_string() })?;
    if !metadata.is_dir() {
        return Err(ProfilerError::InvalidCgroup {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(metadata.ino())
}

/// Write the sample filter into the `CONFIG` map (0 = no filter)
///
/// # Errors
/// Returns an error if the map is missing or the update fails
pub fn configure_filters(bpf: &mut Ebpf, filter: &SampleFilter) -> Result<()> {
    let mut config_map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map_mut(CONFIG_MAP).ok_or(ProfilerError::MapNotFound(CONFIG_MAP))?)?;

    let pid = filter.pid.map_or(0, |pid| u64::from(pid.0));
    let cgroup = filter.cgroup_id.unwrap_or(0);
    config_map.insert(CONFIG_TARGET_PID, pid, 0)?;
    config_map.insert(CONFIG_TARGET_CGROUP, cgroup, 0)?;

    match filter.pid {
        Some(pid) => info!("✓ Set target PID: {}", pid.0),
        None => info!("✓ Sampling all processes"),
    }
    if let Some(id) = filter.cgroup_id {
        info!("✓ Set target cgroup id: {id}");
    }
    Ok(())
}

/// Load the sampler and attach it to every online CPU at `frequency` Hz
///
/// Returns the number of CPUs attached.
///
/// # Errors
/// Returns an error if the program is missing, fails verification or cannot
/// be attached
pub fn attach_cpu_sampler(bpf: &mut Ebpf, frequency: u64) -> Result<usize> {
    let program: &mut PerfEvent = bpf
        .program_mut(SAMPLER_PROGRAM)
        .ok_or(ProfilerError::ProgramNotFound(SAMPLER_PROGRAM))?
        .try_into()?;
    program.load().context("Failed to load on_cpu_sample")?;

    let cpus = online_cpus()?;
    for cpu in &cpus {
        program
            .attach(
                perf_event::PerfTypeId::Software,
                perf_event::perf_sw_ids::PERF_COUNT_SW_CPU_CLOCK as u64,
                perf_event::PerfEventScope::AllProcessesOneCpu { cpu: cpu.0 },
                perf_event::SamplePolicy::Frequency(frequency),
                false,
            )
            .map_err(|e| ProfilerError::PerfAttachFailed { cpu: *cpu, error: e.to_string() })?;
    }

    info!("✓ Attached perf_event sampler to {} CPUs at {frequency} Hz", cpus.len());
    Ok(cpus.len())
}

/// Move the two raw tables out of the loaded object
///
/// # Errors
/// Returns an error if either map is missing or has an unexpected type
pub fn take_tables(bpf: &mut Ebpf) -> Result<(BpfCountsTable, BpfStackTable)> {
    let counts = bpf.take_map(COUNTS_MAP).ok_or(ProfilerError::MapNotFound(COUNTS_MAP))?;
    let counts: HashMap<MapData, [u8; SAMPLE_KEY_SIZE], [u8; COUNT_VALUE_SIZE]> =
        HashMap::try_from(counts).context("COUNTS has an unexpected layout")?;

    let stacks = bpf.take_map(STACK_TRACES_MAP).ok_or(ProfilerError::MapNotFound(STACK_TRACES_MAP))?;
    let stacks = StackTraceMap::try_from(stacks).context("STACK_TRACES has an unexpected type")?;

    Ok((BpfCountsTable::new(counts), BpfStackTable::new(stacks)))
}
