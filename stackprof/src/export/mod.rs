//! # Profile Export
//!
//! Finished profiles leave the pipeline through a [`ProfileSink`].
//!
//! ## Sinks
//!
//! - [`PprofFileSink`]: gzipped pprof protobuf, readable by `go tool pprof`
//!   and most profile viewers
//! - [`JsonFileSink`]: the [`Profile`] model as JSON, for inspection
//! - [`MemorySink`]: keeps profiles in memory (tests, embedding)
//!
//! ## File Naming
//!
//! ```text
//! profile.pb.gz-<pid>-<YYYYmmddHHMMSS>     per-process pprof
//! profile.pb.gz-all-<YYYYmmddHHMMSS>       merged pprof
//! profile-<pid|all>-<YYYYmmddHHMMSS>.json  JSON
//! ```
//!
//! The timestamp is the end of the cycle in local time (UTC if the local
//! offset cannot be determined). An existing file is never overwritten; a
//! `.1`, `.2`, ... suffix is added instead.

pub mod json;
pub mod pprof;

use crate::domain::SinkError;
use crate::profile::Profile;
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub use json::JsonFileSink;
pub use pprof::PprofFileSink;

/// Destination for finalized profiles
pub trait ProfileSink {
    /// Hand off one profile
    ///
    /// # Errors
    /// Returns a [`SinkError`] if the profile could not be stored; other
    /// profiles of the same cycle are still offered to the sink.
    fn write(&mut self, profile: &Profile) -> Result<(), SinkError>;
}

/// Collects profiles in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    profiles: Vec<Profile>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn take(&mut self) -> Vec<Profile> {
        std::mem::take(&mut self.profiles)
    }
}

impl ProfileSink for MemorySink {
    fn write(&mut self, profile: &Profile) -> Result<(), SinkError> {
        self.profiles.push(profile.clone());
        Ok(())
    }
}

/// On-disk profile format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// gzipped pprof protobuf
    #[default]
    Pprof,
    /// Pretty-printed JSON
    Json,
}

impl OutputFormat {
    /// File name for a profile of `partition` finished at `at`
    ///
    /// # Errors
    /// Returns [`SinkError::Timestamp`] if `at` cannot be formatted
    pub fn file_name(self, partition: &str, at: OffsetDateTime) -> Result<String, SinkError> {
        let stamp = at.format(format_description!("[year][month][day][hour][minute][second]"))?;
        Ok(match self {
            OutputFormat::Pprof => format!("profile.pb.gz-{partition}-{stamp}"),
            OutputFormat::Json => format!("profile-{partition}-{stamp}.json"),
        })
    }
}

/// Build the sink for `format`, writing into `out_dir`
#[must_use]
pub fn sink_for(format: OutputFormat, out_dir: PathBuf) -> Box<dyn ProfileSink> {
    match format {
        OutputFormat::Pprof => Box::new(PprofFileSink::new(out_dir)),
        OutputFormat::Json => Box::new(JsonFileSink::new(out_dir)),
    }
}

/// End of the profile's cycle in local time
#[must_use]
pub fn profile_timestamp(profile: &Profile) -> OffsetDateTime {
    let end = i128::from(profile.time_nanos) + i128::from(profile.duration_nanos);
    let utc = OffsetDateTime::from_unix_timestamp_nanos(end).unwrap_or_else(|_| OffsetDateTime::now_utc());
    utc.to_offset(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

/// Output path for `profile` in `dir`, never an existing file
///
/// # Errors
/// Returns [`SinkError::Timestamp`] if the file name cannot be built
pub fn output_path(dir: &Path, format: OutputFormat, profile: &Profile) -> Result<PathBuf, SinkError> {
    let name = format.file_name(&profile.partition_label(), profile_timestamp(profile))?;
    let mut path = dir.join(&name);
    let mut attempt = 1;
    while path.exists() {
        path = dir.join(format!("{name}.{attempt}"));
        attempt += 1;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;
    use crate::profile::ValueType;
    use time::macros::datetime;

    fn profile(partition: Option<Pid>) -> Profile {
        Profile {
            partition,
            period_type: ValueType::new("cpu", "nanoseconds"),
            period: 10_000_000,
            sample_types: vec![ValueType::new("samples", "count")],
            samples: vec![],
            locations: vec![],
            functions: vec![],
            time_nanos: 1_700_000_000_000_000_000,
            duration_nanos: 5_000_000_000,
        }
    }

    #[test]
    fn test_file_names() {
        let at = datetime!(2024-01-02 03:04:05 UTC);
        assert_eq!(OutputFormat::Pprof.file_name("1234", at).unwrap(), "profile.pb.gz-1234-20240102030405");
        assert_eq!(OutputFormat::Pprof.file_name("all", at).unwrap(), "profile.pb.gz-all-20240102030405");
        assert_eq!(OutputFormat::Json.file_name("all", at).unwrap(), "profile-all-20240102030405.json");
    }

    #[test]
    fn test_output_path_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let profile = profile(None);

        let first = output_path(dir.path(), OutputFormat::Pprof, &profile).unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = output_path(dir.path(), OutputFormat::Pprof, &profile).unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with(".1"));
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::new();
        sink.write(&profile(Some(Pid(1)))).unwrap();
        sink.write(&profile(None)).unwrap();
        assert_eq!(sink.profiles().len(), 2);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.profiles().is_empty());
    }
}
