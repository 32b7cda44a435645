//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregation::{Partitioning, PipelineConfig, RegistryScope, DEFAULT_SAMPLE_FREQUENCY};
use crate::domain::Pid;
use crate::export::OutputFormat;
use crate::profiling::DEFAULT_BPF_OBJECT;
use crate::symbolization::DEFAULT_KALLSYMS_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "stackprof",
    about = "Sample kernel and user stacks with eBPF and write pprof profiles",
    after_help = "\
EXAMPLES:
    sudo stackprof                                   Profile every process, one file per PID every 5s
    sudo stackprof --pid 1234 --duration 10          One process, 10 second profiles
    sudo stackprof --output merged --cycles 1        A single merged profile, then exit
    sudo stackprof --cgroup /sys/fs/cgroup/system.slice/nginx.service --format json"
)]
pub struct Args {
    /// Process ID to profile (default: all processes)
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Length of each profiling cycle in seconds
    #[arg(short, long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// Only sample tasks in this cgroup v2 directory
    #[arg(long, value_name = "DIR")]
    pub cgroup: Option<PathBuf>,

    /// Sampling frequency in Hz
    #[arg(short, long, default_value_t = DEFAULT_SAMPLE_FREQUENCY, value_parser = clap::value_parser!(u64).range(1..))]
    pub frequency: u64,

    /// Location identity scope
    #[arg(long, value_enum, default_value_t = RegistryScope::PerProcess)]
    pub scope: RegistryScope,

    /// One profile per process, or one merged profile per cycle
    #[arg(long, value_enum, default_value_t = Partitioning::PerProcess)]
    pub output: Partitioning,

    /// Output file format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pprof)]
    pub format: OutputFormat,

    /// Directory profiles are written to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Kernel symbol listing
    #[arg(long, value_name = "PATH", default_value = DEFAULT_KALLSYMS_PATH)]
    pub kallsyms: PathBuf,

    /// Compiled eBPF sampler (built by `cargo xtask build-ebpf`)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_BPF_OBJECT)]
    pub bpf_object: PathBuf,

    /// Pause between draining and clearing the kernel tables, in milliseconds
    #[arg(long, value_name = "MS", default_value = "0")]
    pub clear_delay_ms: u64,

    /// Stop after N cycles (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    pub cycles: u64,

    /// Maximum Locations per profile (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub max_locations: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn target_pid(&self) -> Option<Pid> {
        self.pid.map(Pid)
    }

    #[must_use]
    pub fn cycle_duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Cycle limit, `None` when running until interrupted
    #[must_use]
    pub fn cycle_limit(&self) -> Option<u64> {
        (self.cycles > 0).then_some(self.cycles)
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            scope: self.scope,
            partitioning: self.output,
            sample_frequency: self.frequency,
            max_locations: (self.max_locations > 0).then_some(self.max_locations),
            clear_delay: Duration::from_millis(self.clear_delay_ms),
        }
    }
}
