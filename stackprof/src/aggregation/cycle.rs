//! One drain → resolve → assemble → hand-off pass
//!
//! ```text
//! COUNTS ──drain──▶ decode key ──▶ StackDecoder ──▶ ProfileAssembler::add
//!                                                          │
//!        (clear delay) ──▶ clear COUNTS + STACK_TRACES     │
//!                                                          ▼
//!                          ProfileSink ◀── finalize (kallsyms merge, seal)
//! ```
//!
//! Nothing in a cycle is fatal: every failure is logged, counted in
//! [`CycleStats`] and the rest of the cycle continues.

use super::assembler::{CycleWindow, ProfileAssembler, SampleOutcome};
use super::config::PipelineConfig;
use super::stack_decoder::StackDecoder;
use crate::domain::{decode_count, RegistryError, SampleKey};
use crate::export::ProfileSink;
use crate::symbolization::SymbolSource;
use crate::tables::{CountsTable, StackTable};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Counters for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub entries_seen: usize,
    pub iteration_errors: usize,
    pub decode_errors: usize,
    pub samples: usize,
    pub dedup_hits: usize,
    pub locations: usize,
    pub functions: usize,
    pub budget_skips: usize,
    pub registry_failures: usize,
    pub clear_failures: usize,
    pub profiles_written: usize,
    pub sink_failures: usize,
}

impl CycleStats {
    /// True if anything was dropped or failed
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.iteration_errors
            + self.decode_errors
            + self.budget_skips
            + self.registry_failures
            + self.clear_failures
            + self.sink_failures
            > 0
    }
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} samples ({} merged), {} locations, {} functions, {} profiles written",
            self.entries_seen,
            self.samples,
            self.dedup_hits,
            self.locations,
            self.functions,
            self.profiles_written
        )?;
        if self.is_degraded() {
            write!(
                f,
                " [iteration errors: {}, decode errors: {}, budget skips: {}, registry failures: {}, clear failures: {}, sink failures: {}]",
                self.iteration_errors,
                self.decode_errors,
                self.budget_skips,
                self.registry_failures,
                self.clear_failures,
                self.sink_failures
            )?;
        }
        Ok(())
    }
}

/// Runs cycles back to back; owns only what must survive between them
pub struct CyclePipeline {
    config: PipelineConfig,
    symbols: Box<dyn SymbolSource>,
    window_start: SystemTime,
    cycles: u64,
}

impl CyclePipeline {
    #[must_use]
    pub fn new(config: PipelineConfig, symbols: Box<dyn SymbolSource>) -> Self {
        Self { config, symbols, window_start: SystemTime::now(), cycles: 0 }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of cycles completed
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Drain both tables, clear them and hand the resulting profiles to `sink`
    pub async fn run_cycle(
        &mut self,
        counts: &mut dyn CountsTable,
        stacks: &mut dyn StackTable,
        sink: &mut dyn ProfileSink,
    ) -> CycleStats {
        let mut stats = CycleStats::default();
        let window_end = SystemTime::now();
        let window = cycle_window(self.window_start, window_end);

        let assembler = self.drain(&*counts, &*stacks, &mut stats);

        if !self.config.clear_delay.is_zero() {
            tokio::time::sleep(self.config.clear_delay).await;
        }

        if let Err(e) = counts.clear() {
            warn!("{e}; entries may be counted again next cycle");
            stats.clear_failures += 1;
        }
        if let Err(e) = stacks.clear() {
            warn!("{e}");
            stats.clear_failures += 1;
        }
        self.window_start = window_end;

        for result in assembler.finalize(self.symbols.as_ref(), window) {
            let profile = match result {
                Ok(profile) => profile,
                Err(e) => {
                    error!("Discarding profile: {e}");
                    stats.registry_failures += 1;
                    continue;
                }
            };

            stats.samples += profile.samples.len();
            stats.locations += profile.locations.len();
            stats.functions += profile.functions.len();

            match sink.write(&profile) {
                Ok(()) => stats.profiles_written += 1,
                Err(e) => {
                    error!("Failed to write profile for partition {}: {e}", profile.partition_label());
                    stats.sink_failures += 1;
                }
            }
        }

        self.cycles += 1;
        info!("Cycle {}: {stats}", self.cycles);
        stats
    }

    fn drain(
        &self,
        counts: &dyn CountsTable,
        stacks: &dyn StackTable,
        stats: &mut CycleStats,
    ) -> ProfileAssembler {
        let decoder = StackDecoder::new(stacks);
        let mut assembler = ProfileAssembler::new(self.config.clone());

        for entry in counts.entries() {
            stats.entries_seen += 1;

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    stats.iteration_errors += 1;
                    continue;
                }
            };

            let decoded = SampleKey::decode(&entry.key)
                .and_then(|key| decode_count(&entry.value).map(|count| (key, count)));
            let (key, count) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Skipping malformed entry: {e}");
                    stats.decode_errors += 1;
                    continue;
                }
            };

            let stack = decoder.resolve(&key);
            debug!(
                "{} ({}) kern={} user={} depth={} count={count}",
                key.pid,
                key.comm_str(),
                key.kernel_stack_id,
                key.user_stack_id,
                stack.depth()
            );

            match assembler.add(key.pid, stack, count) {
                Ok(SampleOutcome::Merged) => stats.dedup_hits += 1,
                Ok(SampleOutcome::New) => {}
                Err(e @ RegistryError::BudgetExhausted { .. }) => {
                    warn!("Skipping sample from {}: {e}", key.pid);
                    stats.budget_skips += 1;
                }
                Err(e) => {
                    error!("Skipping sample from {}: {e}", key.pid);
                    stats.registry_failures += 1;
                }
            }
        }

        assembler
    }
}

fn cycle_window(start: SystemTime, end: SystemTime) -> CycleWindow {
    let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let length = end.duration_since(start).unwrap_or(Duration::ZERO);
    CycleWindow {
        time_nanos: i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX),
        duration_nanos: i64::try_from(length.as_nanos()).unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_window() {
        let start = UNIX_EPOCH + Duration::from_secs(10);
        let window = cycle_window(start, start + Duration::from_millis(5));
        assert_eq!(window.time_nanos, 10_000_000_000);
        assert_eq!(window.duration_nanos, 5_000_000);
    }

    #[test]
    fn test_clock_going_backwards_gives_zero_duration() {
        let start = UNIX_EPOCH + Duration::from_secs(10);
        let window = cycle_window(start, UNIX_EPOCH);
        assert_eq!(window.duration_nanos, 0);
    }

    #[test]
    fn test_stats_display_mentions_failures_only_when_degraded() {
        let stats = CycleStats { entries_seen: 3, samples: 2, ..CycleStats::default() };
        assert!(!stats.to_string().contains("decode errors"));

        let stats = CycleStats { decode_errors: 1, ..stats };
        assert!(stats.is_degraded());
        assert!(stats.to_string().contains("decode errors: 1"));
    }
}
