//! # Sample Aggregation
//!
//! Turns the raw counts table into deduplicated, symbolized profiles once per
//! cycle.
//!
//! - [`config`]: scope, partitioning and budget knobs
//! - [`stack_decoder`]: stack id → trimmed address sequence
//! - [`registry`]: Location and Function identity
//! - [`assembler`]: per-cycle folding and finalization
//! - [`cycle`]: the drain / clear / finalize / hand-off driver

pub mod assembler;
pub mod config;
pub mod cycle;
pub mod registry;
pub mod stack_decoder;

pub use assembler::{CycleWindow, ProfileAssembler, SampleOutcome};
pub use config::{Partitioning, PipelineConfig, RegistryScope, DEFAULT_SAMPLE_FREQUENCY};
pub use cycle::{CyclePipeline, CycleStats};
pub use registry::IdentityRegistry;
pub use stack_decoder::{decode_raw_stack, ResolvedStack, StackDecoder};
