//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the map layouts and constants shared between the kernel-side
//! sampler and the userspace aggregator. All types use `#[repr(C)]` so the
//! byte layout the kernel writes is the byte layout userspace decodes.
//!
//! ## Maps
//!
//! - `COUNTS` - [`CountsKey`] → `u64` occurrence count
//! - `STACK_TRACES` - stack id → [`MAX_STACK_DEPTH`] instruction pointers
//! - `CONFIG` - runtime filters, see [`CONFIG_TARGET_PID`] and [`CONFIG_TARGET_CGROUP`]

#![no_std]

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of stack frames to capture
///
/// Kernel eBPF programs are limited to 127 frames due to verifier constraints.
/// Every record in `STACK_TRACES` is exactly this many `u64` slots, zero padded.
pub const MAX_STACK_DEPTH: usize = 127;

/// Length of the kernel's task command name (`TASK_COMM_LEN`)
pub const TASK_COMM_LEN: usize = 16;

/// Size in bytes of an encoded [`CountsKey`]
pub const SAMPLE_KEY_SIZE: usize = TASK_COMM_LEN + 4 + 4 + 4;

/// Size in bytes of a `COUNTS` value (little-endian `u64`)
pub const COUNT_VALUE_SIZE: usize = 8;

/// Capacity of the `COUNTS` map
pub const COUNTS_MAX_ENTRIES: u32 = 10_000;

/// Capacity of the `STACK_TRACES` map
pub const STACK_TRACES_MAX_ENTRIES: u32 = 10_000;

/// `CONFIG` key holding the target process id (tgid). 0 means every process.
pub const CONFIG_TARGET_PID: u32 = 0;

/// `CONFIG` key holding the target cgroup v2 id. 0 means every cgroup.
pub const CONFIG_TARGET_CGROUP: u32 = 1;

/// `bpf_get_stackid` flag: compare stacks by hash only
pub const BPF_F_FAST_STACK_CMP: u64 = 0x200;

/// `bpf_get_stackid` flag: walk the user stack instead of the kernel stack
pub const BPF_F_USER_STACK: u64 = 0x100;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Key of the `COUNTS` map
///
/// One entry exists per distinct (process, kernel stack, user stack) triple
/// observed since the last clear. The value is the number of samples that hit
/// it.
///
/// **Memory Layout**: 28 bytes, no padding, little-endian on every supported
/// BPF target:
///
/// | offset | field |
/// |---|---|
/// | 0 | `comm[16]` |
/// | 16 | `pid: u32` |
/// | 20 | `kern_stack_id: i32` |
/// | 24 | `user_stack_id: i32` |
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountsKey {
    /// Command name of the sampled task (NUL padded)
    pub comm: [u8; TASK_COMM_LEN],

    /// Process ID (TGID in Linux terms)
    pub pid: u32,

    /// Kernel stack id in `STACK_TRACES`
    ///
    /// Negative when `bpf_get_stackid` failed (e.g. `-EFAULT` for a task
    /// sampled in user mode, `-ENOMEM` when the map is full).
    pub kern_stack_id: i32,

    /// User stack id in `STACK_TRACES`, negative when unavailable
    pub user_stack_id: i32,
}

impl CountsKey {
    /// Encodes the key exactly as the kernel lays it out in map memory
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; SAMPLE_KEY_SIZE] {
        let mut out = [0u8; SAMPLE_KEY_SIZE];
        out[..TASK_COMM_LEN].copy_from_slice(&self.comm);
        out[16..20].copy_from_slice(&self.pid.to_le_bytes());
        out[20..24].copy_from_slice(&self.kern_stack_id.to_le_bytes());
        out[24..28].copy_from_slice(&self.user_stack_id.to_le_bytes());
        out
    }
}

const _: () = assert!(core::mem::size_of::<CountsKey>() == SAMPLE_KEY_SIZE);
