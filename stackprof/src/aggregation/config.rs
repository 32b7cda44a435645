//! Pipeline configuration

use clap::ValueEnum;
use std::time::Duration;

/// Default sampling frequency of the kernel-side sampler
pub const DEFAULT_SAMPLE_FREQUENCY: u64 = 100;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// How Location identity is scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RegistryScope {
    /// One address space for all processes: equal user addresses in
    /// different processes share a Location
    Global,
    /// User addresses are keyed by process; kernel addresses stay shared
    #[default]
    PerProcess,
}

impl RegistryScope {
    /// Short label for log lines
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            RegistryScope::Global => "global",
            RegistryScope::PerProcess => "per-process",
        }
    }
}

/// How samples are grouped into profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Partitioning {
    /// One profile per process id
    #[default]
    PerProcess,
    /// A single profile for everything sampled in the cycle
    Merged,
}

impl Partitioning {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Partitioning::PerProcess => "per-process",
            Partitioning::Merged => "merged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub scope: RegistryScope,
    pub partitioning: Partitioning,
    /// Sampler frequency in Hz, used for the profile period
    pub sample_frequency: u64,
    /// Location budget per registry, `None` for unbounded
    pub max_locations: Option<usize>,
    /// Pause between draining and clearing the raw tables
    pub clear_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scope: RegistryScope::default(),
            partitioning: Partitioning::default(),
            sample_frequency: DEFAULT_SAMPLE_FREQUENCY,
            max_locations: None,
            clear_delay: Duration::ZERO,
        }
    }
}

impl PipelineConfig {
    /// Sampling period in nanoseconds (100 Hz → 10ms)
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn period_nanos(&self) -> i64 {
        (NANOS_PER_SECOND / self.sample_frequency.max(1)) as i64
    }
}
