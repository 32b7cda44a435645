//! Structured error types for stackprof
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Everything except [`ProfilerError`] is recoverable inside a cycle: the
//! caller logs it, counts it and moves on.

use super::types::{CpuId, LocationId, Pid};
use std::path::PathBuf;
use thiserror::Error;

/// Malformed bytes from the counts table
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("sample key is {actual} bytes, expected {expected}")]
    KeyLength { expected: usize, actual: usize },

    #[error("count value is {actual} bytes, expected {expected}")]
    ValueLength { expected: usize, actual: usize },
}

/// Failures talking to the raw kernel tables
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to iterate {table}: {reason}")]
    Iterate { table: &'static str, reason: String },

    #[error("Failed to clear {failed} of {total} entries in {table}")]
    Clear { table: &'static str, failed: usize, total: usize },
}

/// Identity registry violations
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} is already bound to a function")]
    AlreadyBound(LocationId),

    #[error("{0} has no function bound at finalization")]
    UnboundLocation(LocationId),

    #[error("Location budget of {limit} exhausted")]
    BudgetExhausted { limit: usize },

    #[error("{0} does not exist in this registry")]
    UnknownLocation(LocationId),
}

/// Failures handing a finished profile to its destination
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to encode profile: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Failed to format output timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Fatal setup failures
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("eBPF map {0} not found")]
    MapNotFound(&'static str),

    #[error("eBPF program {0} not found")]
    ProgramNotFound(&'static str),

    #[error("Failed to attach perf_event sampler on {cpu}: {error}")]
    PerfAttachFailed { cpu: CpuId, error: String },

    #[error("Invalid cgroup directory {}: {reason}", path.display())]
    InvalidCgroup { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_error_display() {
        let err = ProfilerError::ProcessNotFound(Pid(1234));
        assert_eq!(err.to_string(), "Process PID:1234 not found");
    }

    #[test]
    fn test_perf_attach_error() {
        let err = ProfilerError::PerfAttachFailed { cpu: CpuId(3), error: "EACCES".to_string() };
        assert!(err.to_string().contains("CPU:3"));
        assert!(err.to_string().contains("EACCES"));
    }

    #[test]
    fn test_clear_error_reports_counts() {
        let err = TableError::Clear { table: "COUNTS", failed: 2, total: 10 };
        assert_eq!(err.to_string(), "Failed to clear 2 of 10 entries in COUNTS");
    }

    #[test]
    fn test_sink_write_error_names_path() {
        let err = SinkError::Write {
            path: PathBuf::from("/tmp/out/profile.pb.gz-1-20240101000000"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/tmp/out/profile.pb.gz-1-20240101000000"));
    }
}
