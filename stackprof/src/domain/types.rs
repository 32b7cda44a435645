//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a Location ID where
//! a Function ID is expected, and make function signatures more expressive.

use serde::Serialize;
use std::fmt;

/// Process ID
///
/// Represents a process ID (tgid) in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Stack trace ID from eBPF
///
/// Represents a stack trace ID stored in the eBPF stack trace map.
/// Negative values indicate no stack trace was captured (the value is the
/// negated errno returned by `bpf_get_stackid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackId(pub i32);

impl StackId {
    /// Returns true if this stack ID is valid (non-negative)
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Convert to u32 for eBPF map lookup, `None` if no stack was captured
    #[must_use]
    pub fn as_map_key(self) -> Option<u32> {
        u32::try_from(self.0).ok()
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stack#{}", self.0)
    }
}

/// Location ID (1-based)
///
/// Identifies one code address inside a single profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location#{}", self.0)
    }
}

/// Function ID (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function#{}", self.0)
    }
}

/// Which half of a sample an address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackSide {
    Kernel,
    User,
}

impl fmt::Display for StackSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackSide::Kernel => write!(f, "kernel"),
            StackSide::User => write!(f, "user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_conversion() {
        let pid = Pid::from(1234i32);
        assert_eq!(pid.0, 1234);
        let back: i32 = pid.into();
        assert_eq!(back, 1234);
        assert_eq!(pid.to_string(), "PID:1234");
    }

    #[test]
    fn test_stack_id_validity() {
        assert!(StackId(5).is_valid());
        assert!(StackId(0).is_valid());
        assert!(!StackId(-14).is_valid());
        assert_eq!(StackId(42).as_map_key(), Some(42));
        assert_eq!(StackId(-1).as_map_key(), None);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(LocationId(3).to_string(), "Location#3");
        assert_eq!(FunctionId(7).to_string(), "Function#7");
        assert_eq!(StackSide::Kernel.to_string(), "kernel");
        assert_eq!(CpuId(2).to_string(), "CPU:2");
    }
}
