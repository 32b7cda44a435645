//! # stackprof - eBPF Stack Sampling Profiler
//!
//! stackprof samples the kernel and user stacks of running tasks at a fixed
//! frequency with an eBPF `perf_event` program, aggregates the samples in the
//! kernel, and periodically turns them into deduplicated, symbolized pprof
//! profiles.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  eBPF Sampler (Kernel, per CPU)                 │
//! │  • perf_event on PERF_COUNT_SW_CPU_CLOCK at --frequency Hz      │
//! │  • bpf_get_stackid() for kernel and user stacks                 │
//! │  • COUNTS[(comm, pid, kern id, user id)] += 1                   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ COUNTS + STACK_TRACES maps
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     stackprof (This Crate)                      │
//! │                                                                 │
//! │  every --duration seconds:                                      │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────────┐             │
//! │  │  tables  │──▶│ aggregation  │──▶│    export    │             │
//! │  │ (drain)  │   │ dedup + IDs  │   │ pprof / json │             │
//! │  └──────────┘   └──────┬───────┘   └──────────────┘             │
//! │                        │                                        │
//! │                        ▼                                        │
//! │                 ┌──────────────┐                                │
//! │                 │symbolization │                                │
//! │                 │ (kallsyms)   │                                │
//! │                 └──────────────┘                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`tables`]: the raw counts and stack tables behind traits, with eBPF and
//!   in-memory implementations
//! - [`aggregation`]: stack decoding, the identity registry, profile assembly
//!   and the per-cycle driver
//! - [`symbolization`]: kallsyms parsing and the linear-merge kernel symbolizer
//! - [`profile`]: the finalized profile model
//! - [`export`]: profile sinks (pprof protobuf, JSON, memory)
//! - [`profiling`]: eBPF loading, filter configuration and CPU attachment
//! - [`preflight`]: privilege and environment checks
//! - [`cli`]: command-line arguments
//! - [`domain`]: newtypes, raw key decoding and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! cargo xtask build-ebpf --release
//! cargo build --release
//!
//! # One pprof file per process every 5 seconds
//! sudo ./target/release/stackprof
//!
//! # A single 30 second merged profile
//! sudo ./target/release/stackprof --duration 30 --output merged --cycles 1
//! go tool pprof -http :8080 profile.pb.gz-all-*
//! ```
//!
//! ## Key Concepts
//!
//! - **Stack id**: handle returned by `bpf_get_stackid()`; negative when the
//!   stack could not be captured
//! - **Location**: one code address in a profile
//! - **Function**: the name a Location is attributed to (kernel symbol or a
//!   hex placeholder for user frames)
//! - **Cycle**: one drain → clear → symbolize → write pass over the tables

pub mod aggregation;
pub mod cli;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod profile;
pub mod profiling;
pub mod symbolization;
pub mod tables;
