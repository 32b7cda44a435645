//! Domain model for stackprof
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Decoding of the raw counts-table layout
//! - Structured error handling

pub mod errors;
pub mod sample;
pub mod types;

// Re-export common types for convenience
pub use sample::{decode_count, SampleKey};
pub use types::{CpuId, FunctionId, LocationId, Pid, StackId, StackSide};

pub use errors::{DecodeError, ProfilerError, RegistryError, SinkError, TableError};
