//! # eBPF Kernel-Side Sampler
//!
//! A `perf_event` program attached to the software CPU clock on every online
//! CPU. Each sample records the kernel and user stacks of the interrupted task
//! and bumps a counter keyed by (comm, pid, kernel stack id, user stack id).
//!
//! ## Maps (Shared with Userspace)
//!
//! - `COUNTS` - occurrence counters, drained and cleared every cycle
//! - `STACK_TRACES` - deduplicated stack traces by ID
//! - `CONFIG` - runtime filters (target PID, target cgroup)
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    helpers::{bpf_get_current_cgroup_id, bpf_get_current_comm, bpf_get_current_pid_tgid},
    macros::{map, perf_event},
    maps::{HashMap, StackTrace},
    programs::PerfEventContext,
};
use aya_log_ebpf::debug;
use stackprof_common::{
    CountsKey, BPF_F_FAST_STACK_CMP, BPF_F_USER_STACK, CONFIG_TARGET_CGROUP, CONFIG_TARGET_PID,
    COUNTS_MAX_ENTRIES, STACK_TRACES_MAX_ENTRIES,
};

// ============================================================================
// Constants
// ============================================================================

/// `bpf_map_update_elem` flag: only create, fail if the key exists
const BPF_NOEXIST: u64 = 1;

const KERNEL_STACK_FLAGS: u64 = BPF_F_FAST_STACK_CMP;
const USER_STACK_FLAGS: u64 = BPF_F_FAST_STACK_CMP | BPF_F_USER_STACK;

// ============================================================================
// eBPF Maps
// ============================================================================

/// Map: sample key → occurrence count
///
/// Userspace drains this map every cycle and then deletes every key. Writes
/// racing with the drain may be lost or counted in the next cycle.
#[map]
static COUNTS: HashMap<CountsKey, u64> = HashMap::with_max_entries(COUNTS_MAX_ENTRIES, 0);

/// Stack trace map for storing deduplicated stack traces by ID
///
/// A full map makes `bpf_get_stackid` return `-ENOMEM`; that side of the
/// sample then carries a negative id and userspace treats it as empty.
#[map]
static STACK_TRACES: StackTrace = StackTrace::with_max_entries(STACK_TRACES_MAX_ENTRIES, 0);

/// Map: Config key → Config value
///
/// - **Key 0**: Target PID (tgid), 0 = every process
/// - **Key 1**: Target cgroup v2 id, 0 = every cgroup
#[map]
static CONFIG: HashMap<u32, u64> = HashMap::with_max_entries(16, 0);

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// CPU Sampling Profiler - Captures stack ids via `perf_event`
#[perf_event]
pub fn on_cpu_sample(ctx: PerfEventContext) -> u32 {
    match try_on_cpu_sample(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_on_cpu_sample(ctx: &PerfEventContext) -> Result<(), i64> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let pid = (pid_tgid >> 32) as u32;

    // Idle task
    if pid == 0 {
        return Ok(());
    }

    let target_pid = config_value(CONFIG_TARGET_PID);
    if target_pid != 0 && u64::from(pid) != target_pid {
        return Ok(());
    }

    let target_cgroup = config_value(CONFIG_TARGET_CGROUP);
    if target_cgroup != 0 && unsafe { bpf_get_current_cgroup_id() } != target_cgroup {
        return Ok(());
    }

    let kern_stack_id = capture_stack(ctx, KERNEL_STACK_FLAGS);
    let user_stack_id = capture_stack(ctx, USER_STACK_FLAGS);
    if kern_stack_id < 0 && user_stack_id < 0 {
        debug!(ctx, "no stack captured for pid {}: kern={} user={}", pid, kern_stack_id, user_stack_id);
        return Ok(());
    }

    let key = CountsKey {
        comm: bpf_get_current_comm().unwrap_or([0u8; 16]),
        pid,
        kern_stack_id,
        user_stack_id,
    };

    increment(&key)
}

fn config_value(key: u32) -> u64 {
    unsafe { CONFIG.get(&key).copied().unwrap_or(0) }
}

// Raw error codes are kept so userspace sees which side failed
fn capture_stack(ctx: &PerfEventContext, flags: u64) -> i32 {
    let id = unsafe { STACK_TRACES.get_stackid(ctx, flags).unwrap_or_else(|e| e) };
    id as i32
}

fn increment(key: &CountsKey) -> Result<(), i64> {
    if let Some(slot) = unsafe { COUNTS.get_ptr_mut(key) } {
        let counter = unsafe { AtomicU64::from_ptr(slot) };
        counter.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    // Another CPU may have created the entry in between; retry the bump once
    if unsafe { COUNTS.insert(key, &1, BPF_NOEXIST) }.is_err() {
        let slot = unsafe { COUNTS.get_ptr_mut(key) }.ok_or(1i64)?;
        let counter = unsafe { AtomicU64::from_ptr(slot) };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
