//! Kernel-facing setup
//!
//! - CPU enumeration for per-CPU `perf_event` attachment
//! - eBPF program loading, filter configuration and map hand-off

pub mod cpu_utils;
pub mod ebpf_setup;

// Re-export common types
pub use cpu_utils::online_cpus;
pub use ebpf_setup::{
    attach_cpu_sampler, cgroup_id, configure_filters, init_ebpf_logger, load_ebpf_program,
    take_tables, SampleFilter, DEFAULT_BPF_OBJECT, SAMPLER_PROGRAM,
};
