//! pprof protobuf encoding
//!
//! The messages below are the subset of `profile.proto` this tool emits,
//! declared by hand with `prost` derives so no build script is needed.

use super::{output_path, OutputFormat, ProfileSink};
use crate::domain::SinkError;
use crate::profile::Profile;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use prost::Message;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// `perftools.profiles` messages
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Profile {
        #[prost(message, repeated, tag = "1")]
        pub sample_types: Vec<ValueType>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
        #[prost(message, repeated, tag = "4")]
        pub locations: Vec<Location>,
        #[prost(message, repeated, tag = "5")]
        pub functions: Vec<Function>,
        #[prost(string, repeated, tag = "6")]
        pub string_table: Vec<String>,
        #[prost(int64, tag = "9")]
        pub time_nanos: i64,
        #[prost(int64, tag = "10")]
        pub duration_nanos: i64,
        #[prost(message, optional, tag = "11")]
        pub period_type: Option<ValueType>,
        #[prost(int64, tag = "12")]
        pub period: i64,
        #[prost(int64, repeated, tag = "13")]
        pub comment: Vec<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Sample {
        #[prost(uint64, repeated, tag = "1")]
        pub location_ids: Vec<u64>,
        #[prost(int64, repeated, tag = "2")]
        pub values: Vec<i64>,
    }

    #[derive(Copy, Clone, PartialEq, Eq, ::prost::Message)]
    pub struct ValueType {
        #[prost(int64, tag = "1")]
        pub r#type: i64, // Index into string table
        #[prost(int64, tag = "2")]
        pub unit: i64, // Index into string table
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Location {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(uint64, tag = "2")]
        pub mapping_id: u64,
        #[prost(uint64, tag = "3")]
        pub address: u64,
        #[prost(message, repeated, tag = "4")]
        pub lines: Vec<Line>,
    }

    #[derive(Copy, Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Line {
        #[prost(uint64, tag = "1")]
        pub function_id: u64,
        #[prost(int64, tag = "2")]
        pub line: i64,
    }

    #[derive(Copy, Clone, PartialEq, Eq, ::prost::Message)]
    pub struct Function {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(int64, tag = "2")]
        pub name: i64, // Index into string table
        #[prost(int64, tag = "3")]
        pub system_name: i64, // Index into string table
        #[prost(int64, tag = "4")]
        pub filename: i64, // Index into string table
        #[prost(int64, tag = "5")]
        pub start_line: i64,
    }
}

/// Interned strings; index 0 is always `""`
#[derive(Debug)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, i64>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self { strings: Vec::new(), index: HashMap::new() };
        table.intern("");
        table
    }

    /// Index of `s`, adding it on first use
    #[allow(clippy::cast_possible_wrap)]
    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as i64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    #[must_use]
    pub fn finalize(self) -> Vec<String> {
        self.strings
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert the profile model into pprof messages
#[must_use]
pub fn to_pprof(profile: &Profile) -> pb::Profile {
    let mut st = StringTable::new();

    let sample_types = profile
        .sample_types
        .iter()
        .map(|vt| pb::ValueType { r#type: st.intern(&vt.kind), unit: st.intern(&vt.unit) })
        .collect();
    let period_type = pb::ValueType {
        r#type: st.intern(&profile.period_type.kind),
        unit: st.intern(&profile.period_type.unit),
    };

    let samples = profile
        .samples
        .iter()
        .map(|s| pb::Sample {
            location_ids: s.locations.iter().map(|id| id.0).collect(),
            values: vec![s.value],
        })
        .collect();

    let locations = profile
        .locations
        .iter()
        .map(|l| pb::Location {
            id: l.id().0,
            mapping_id: 0,
            address: l.address(),
            lines: l.function().map(|f| vec![pb::Line { function_id: f.0, line: 0 }]).unwrap_or_default(),
        })
        .collect();

    let functions = profile
        .functions
        .iter()
        .map(|f| pb::Function {
            id: f.id.0,
            name: st.intern(&f.name),
            system_name: st.intern(f.origin.as_str()),
            filename: 0,
            start_line: 0,
        })
        .collect();

    let comment = match profile.partition {
        Some(pid) => vec![st.intern(&format!("pid={}", pid.0))],
        None => Vec::new(),
    };

    pb::Profile {
        sample_types,
        samples,
        locations,
        functions,
        time_nanos: profile.time_nanos,
        duration_nanos: profile.duration_nanos,
        period_type: Some(period_type),
        period: profile.period,
        comment,
        string_table: st.finalize(),
    }
}

/// Serialized (uncompressed) pprof bytes
///
/// # Errors
/// Returns [`SinkError::Encode`] if prost rejects the message
pub fn encode(profile: &Profile) -> Result<Vec<u8>, SinkError> {
    let message = to_pprof(profile);
    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf)?;
    Ok(buf)
}

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Write { path: path.to_path_buf(), source };

    let file = File::create(path).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(bytes).map_err(io_err)?;
    encoder.finish().map_err(io_err)?.flush().map_err(io_err)?;
    Ok(())
}

/// Writes each profile as `profile.pb.gz-<pid|all>-<timestamp>`
#[derive(Debug)]
pub struct PprofFileSink {
    out_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl PprofFileSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into(), written: Vec::new() }
    }

    /// Files written so far, oldest first
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ProfileSink for PprofFileSink {
    fn write(&mut self, profile: &Profile) -> Result<(), SinkError> {
        let path = output_path(&self.out_dir, OutputFormat::Pprof, profile)?;
        let bytes = encode(profile)?;
        write_gzip(&path, &bytes)?;

        info!(
            "Wrote {} ({} samples, {} locations)",
            path.display(),
            profile.samples.len(),
            profile.locations.len()
        );
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_table_starts_with_empty_string() {
        let st = StringTable::new();
        assert_eq!(st.finalize(), vec![String::new()]);
    }

    #[test]
    fn test_string_table_reuses_indices() {
        let mut st = StringTable::new();
        let a = st.intern("schedule");
        let b = st.intern("0x1000");
        assert_eq!(st.intern("schedule"), a);
        assert_eq!(st.intern(""), 0);
        assert_eq!((a, b), (1, 2));
    }
}
