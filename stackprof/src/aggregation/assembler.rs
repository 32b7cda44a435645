//! Per-cycle profile assembly
//!
//! A [`ProfileAssembler`] lives for exactly one cycle. Samples are folded in
//! as they are drained; kernel symbols are resolved once, in a single merge,
//! when the cycle is finalized.

use super::config::{Partitioning, PipelineConfig};
use super::registry::IdentityRegistry;
use super::stack_decoder::ResolvedStack;
use crate::domain::{LocationId, Pid, RegistryError, StackSide};
use crate::profile::{FunctionOrigin, Profile, Sample, ValueType};
use crate::symbolization::{load_symbol_table, KernelSymbolizer, SymbolSource, SymbolTable, UNRESOLVED_SYMBOL};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What happened to a submitted sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Same stack already present; its value was increased
    Merged,
    /// New sample appended
    New,
}

/// Time window a cycle covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleWindow {
    /// Start, nanoseconds since the UNIX epoch
    pub time_nanos: i64,
    pub duration_nanos: i64,
}

struct Partition {
    registry: IdentityRegistry,
    samples: Vec<Sample>,
    index: HashMap<(u32, ResolvedStack), usize>,
    pending_kernel: Vec<(u64, LocationId)>,
}

impl Partition {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            registry: IdentityRegistry::new(config.scope, config.max_locations),
            samples: Vec::new(),
            index: HashMap::new(),
            pending_kernel: Vec::new(),
        }
    }
}

pub struct ProfileAssembler {
    config: PipelineConfig,
    partitions: BTreeMap<Option<Pid>, Partition>,
    pending_addresses: BTreeSet<u64>,
}

impl ProfileAssembler {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, partitions: BTreeMap::new(), pending_addresses: BTreeSet::new() }
    }

    /// Fold one drained entry into its partition
    ///
    /// # Errors
    /// Returns [`RegistryError::BudgetExhausted`] if the stack needs more
    /// Locations than the budget allows; nothing is recorded in that case.
    pub fn add(
        &mut self,
        pid: Pid,
        stack: ResolvedStack,
        count: u64,
    ) -> Result<SampleOutcome, RegistryError> {
        let value = i64::try_from(count).unwrap_or(i64::MAX);
        let partition_key = match self.config.partitioning {
            Partitioning::PerProcess => Some(pid),
            Partitioning::Merged => None,
        };

        let config = &self.config;
        let partition = self.partitions.entry(partition_key).or_insert_with(|| Partition::new(config));

        // Stacks with user frames only share Locations within one owner
        let owner = if stack.user.is_empty() {
            0
        } else {
            partition.registry.owner(pid, StackSide::User)
        };
        let dedup_key = (owner, stack);

        if let Some(&index) = partition.index.get(&dedup_key) {
            let sample = &mut partition.samples[index];
            sample.value = sample.value.saturating_add(value);
            return Ok(SampleOutcome::Merged);
        }

        let (_, stack) = &dedup_key;
        if let Err(e) = partition.registry.ensure_capacity(pid, stack) {
            if partition.samples.is_empty() {
                self.partitions.remove(&partition_key);
            }
            return Err(e);
        }

        let mut locations = Vec::with_capacity(stack.depth());
        for &address in &stack.kernel {
            let (id, is_new) = partition.registry.resolve(pid, address, StackSide::Kernel)?;
            if is_new {
                partition.pending_kernel.push((address, id));
                self.pending_addresses.insert(address);
            }
            locations.push(id);
        }
        for &address in &stack.user {
            let (id, is_new) = partition.registry.resolve(pid, address, StackSide::User)?;
            if is_new {
                let function = partition.registry.add_function(format!("{address:#x}"), FunctionOrigin::User);
                partition.registry.bind(id, function)?;
            }
            locations.push(id);
        }

        partition.index.insert(dedup_key, partition.samples.len());
        partition.samples.push(Sample { locations, value });
        Ok(SampleOutcome::New)
    }

    /// Number of partitions holding at least one sample
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Resolve pending kernel Locations, seal every registry and build the
    /// profiles in ascending partition order
    ///
    /// The symbol source is only opened when the cycle saw kernel frames.
    #[must_use]
    pub fn finalize(
        mut self,
        symbols: &dyn SymbolSource,
        window: CycleWindow,
    ) -> Vec<Result<Profile, RegistryError>> {
        let addresses: Vec<u64> = std::mem::take(&mut self.pending_addresses).into_iter().collect();
        let table =
            if addresses.is_empty() { SymbolTable::default() } else { load_symbol_table(symbols) };
        let names = KernelSymbolizer::new(&table).resolve(&addresses);
        let resolved: HashMap<u64, Option<&str>> = addresses.iter().copied().zip(names).collect();

        if self.partitions.is_empty() && self.config.partitioning == Partitioning::Merged {
            self.partitions.insert(None, Partition::new(&self.config));
        }

        let config = &self.config;
        std::mem::take(&mut self.partitions)
            .into_iter()
            .map(|(key, partition)| build_profile(config, key, partition, &resolved, window))
            .collect()
    }
}

fn build_profile(
    config: &PipelineConfig,
    key: Option<Pid>,
    partition: Partition,
    resolved: &HashMap<u64, Option<&str>>,
    window: CycleWindow,
) -> Result<Profile, RegistryError> {
    let Partition { mut registry, samples, mut pending_kernel, .. } = partition;

    pending_kernel.sort_unstable_by_key(|&(address, _)| address);
    for (address, location) in pending_kernel {
        let function = match resolved.get(&address).copied().flatten() {
            Some(name) => registry.add_function(name, FunctionOrigin::Kernel),
            None => registry.add_function(UNRESOLVED_SYMBOL, FunctionOrigin::Unresolved),
        };
        registry.bind(location, function)?;
    }

    let (locations, functions) = registry.seal()?;
    Ok(Profile {
        partition: key,
        period_type: ValueType::new("cpu", "nanoseconds"),
        period: config.period_nanos(),
        sample_types: vec![ValueType::new("samples", "count")],
        samples,
        locations,
        functions,
        time_nanos: window.time_nanos,
        duration_nanos: window.duration_nanos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::config::RegistryScope;
    use crate::symbolization::InMemorySymbols;
    use std::cell::Cell;
    use std::io::{self, BufRead};

    const KALLSYMS: &str = "\
0000000000001000 T do_syscall_64
0000000000002000 T schedule
";

    fn merged(scope: RegistryScope) -> PipelineConfig {
        PipelineConfig { scope, partitioning: Partitioning::Merged, ..PipelineConfig::default() }
    }

    fn finalize_ok(assembler: ProfileAssembler, symbols: &dyn SymbolSource) -> Vec<Profile> {
        assembler
            .finalize(symbols, CycleWindow::default())
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_duplicate_stack_sums_without_new_locations() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        let stack = ResolvedStack::new(vec![0x1500], vec![0x4000, 0x4100]);

        assert_eq!(assembler.add(Pid(1), stack.clone(), 3), Ok(SampleOutcome::New));
        assert_eq!(assembler.add(Pid(1), stack, 4), Ok(SampleOutcome::Merged));

        let profiles = finalize_ok(assembler, &InMemorySymbols::new(KALLSYMS));
        assert_eq!(profiles.len(), 1);
        let profile = &profiles[0];
        assert_eq!(profile.samples.len(), 1);
        assert_eq!(profile.samples[0].value, 7);
        assert_eq!(profile.locations.len(), 3);
        assert_eq!(profile.functions.len(), 3);
    }

    #[test]
    fn test_kernel_frames_resolved_and_user_frames_get_hex_names() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        let stack = ResolvedStack::new(vec![0x2010, 0x1010, 0x0500], vec![0x55d0_0000_1234]);
        assembler.add(Pid(42), stack, 1).unwrap();

        let profiles = finalize_ok(assembler, &InMemorySymbols::new(KALLSYMS));
        let profile = &profiles[0];
        assert_eq!(profile.partition, Some(Pid(42)));
        assert_eq!(
            profile.frame_names(&profile.samples[0]),
            vec!["schedule", "do_syscall_64", "Unknown", "0x55d000001234"]
        );

        let unresolved = profile.functions.iter().find(|f| f.name == "Unknown").unwrap();
        assert_eq!(unresolved.origin, FunctionOrigin::Unresolved);
    }

    #[test]
    fn test_kernel_functions_created_in_address_order() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(1), ResolvedStack::new(vec![0x2010, 0x1010], vec![]), 1).unwrap();

        let profiles = finalize_ok(assembler, &InMemorySymbols::new(KALLSYMS));
        let names: Vec<&str> = profiles[0].functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["do_syscall_64", "schedule"]);
    }

    #[test]
    fn test_per_process_partitioning_orders_by_pid() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(300), ResolvedStack::new(vec![], vec![0x1]), 1).unwrap();
        assembler.add(Pid(20), ResolvedStack::new(vec![], vec![0x1]), 1).unwrap();
        assembler.add(Pid(100), ResolvedStack::new(vec![], vec![0x1]), 1).unwrap();

        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        let pids: Vec<Option<Pid>> = profiles.iter().map(|p| p.partition).collect();
        assert_eq!(pids, vec![Some(Pid(20)), Some(Pid(100)), Some(Pid(300))]);
        // Each partition has its own registry, so IDs restart at 1
        assert!(profiles.iter().all(|p| p.locations[0].id() == LocationId(1)));
    }

    #[test]
    fn test_scope_isolation_in_merged_profile() {
        let stack = ResolvedStack::new(vec![], vec![0x4000]);

        let mut assembler = ProfileAssembler::new(merged(RegistryScope::PerProcess));
        assembler.add(Pid(1), stack.clone(), 1).unwrap();
        assert_eq!(assembler.add(Pid(2), stack.clone(), 1), Ok(SampleOutcome::New));
        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles[0].locations.len(), 2);
        assert_eq!(profiles[0].samples.len(), 2);

        let mut assembler = ProfileAssembler::new(merged(RegistryScope::Global));
        assembler.add(Pid(1), stack.clone(), 1).unwrap();
        assert_eq!(assembler.add(Pid(2), stack, 1), Ok(SampleOutcome::Merged));
        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles[0].locations.len(), 1);
        assert_eq!(profiles[0].samples[0].value, 2);
    }

    #[test]
    fn test_kernel_only_stacks_merge_across_processes() {
        let mut assembler = ProfileAssembler::new(merged(RegistryScope::PerProcess));
        let stack = ResolvedStack::new(vec![0x1010], vec![]);
        assembler.add(Pid(1), stack.clone(), 2).unwrap();
        assert_eq!(assembler.add(Pid(2), stack, 5), Ok(SampleOutcome::Merged));
    }

    #[test]
    fn test_empty_cycle() {
        let assembler = ProfileAssembler::new(merged(RegistryScope::PerProcess));
        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0].samples.is_empty());
        assert!(profiles[0].locations.is_empty());
        assert!(profiles[0].functions.is_empty());
        assert_eq!(profiles[0].period, 10_000_000);

        let assembler = ProfileAssembler::new(PipelineConfig::default());
        assert!(finalize_ok(assembler, &InMemorySymbols::default()).is_empty());
    }

    #[test]
    fn test_empty_stack_is_a_valid_sample() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(5), ResolvedStack::default(), 2).unwrap();
        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles[0].samples, vec![Sample { locations: vec![], value: 2 }]);
    }

    #[test]
    fn test_budget_skip_leaves_no_partial_state() {
        let config = PipelineConfig { max_locations: Some(2), ..PipelineConfig::default() };
        let mut assembler = ProfileAssembler::new(config);
        assembler.add(Pid(1), ResolvedStack::new(vec![], vec![0x1, 0x2]), 1).unwrap();
        assert_eq!(
            assembler.add(Pid(1), ResolvedStack::new(vec![], vec![0x3]), 1),
            Err(RegistryError::BudgetExhausted { limit: 2 })
        );
        // A fresh process that cannot fit anything leaves no empty profile behind
        assert!(assembler.add(Pid(2), ResolvedStack::new(vec![], vec![0x1, 0x2, 0x3]), 1).is_err());
        assert_eq!(assembler.partition_count(), 1);

        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles[0].locations.len(), 2);
        assert_eq!(profiles[0].samples.len(), 1);
    }

    #[test]
    fn test_huge_count_saturates() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        let stack = ResolvedStack::new(vec![], vec![0x1]);
        assembler.add(Pid(1), stack.clone(), u64::MAX).unwrap();
        assembler.add(Pid(1), stack, 10).unwrap();
        let profiles = finalize_ok(assembler, &InMemorySymbols::default());
        assert_eq!(profiles[0].samples[0].value, i64::MAX);
    }

    struct CountingSource {
        opens: Cell<usize>,
    }

    impl SymbolSource for CountingSource {
        fn open(&self) -> io::Result<Box<dyn BufRead + '_>> {
            self.opens.set(self.opens.get() + 1);
            Ok(Box::new(KALLSYMS.as_bytes()))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn test_symbols_loaded_only_when_kernel_frames_seen() {
        let source = CountingSource { opens: Cell::new(0) };

        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(1), ResolvedStack::new(vec![], vec![0x1]), 1).unwrap();
        let _ = assembler.finalize(&source, CycleWindow::default());
        assert_eq!(source.opens.get(), 0);

        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(1), ResolvedStack::new(vec![0x1010], vec![]), 1).unwrap();
        assembler.add(Pid(2), ResolvedStack::new(vec![0x2010], vec![]), 1).unwrap();
        let _ = assembler.finalize(&source, CycleWindow::default());
        assert_eq!(source.opens.get(), 1);
    }

    #[test]
    fn test_window_copied_into_profile() {
        let mut assembler = ProfileAssembler::new(PipelineConfig::default());
        assembler.add(Pid(1), ResolvedStack::new(vec![], vec![0x1]), 1).unwrap();
        let window = CycleWindow { time_nanos: 1_700_000_000_000_000_000, duration_nanos: 5_000_000_000 };
        let profile = assembler.finalize(&InMemorySymbols::default(), window).remove(0).unwrap();
        assert_eq!(profile.time_nanos, window.time_nanos);
        assert_eq!(profile.duration_nanos, window.duration_nanos);
    }
}
