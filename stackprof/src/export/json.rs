//! JSON export of the profile model

use super::{output_path, OutputFormat, ProfileSink};
use crate::domain::SinkError;
use crate::profile::Profile;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Writes each profile as `profile-<pid|all>-<timestamp>.json`
#[derive(Debug)]
pub struct JsonFileSink {
    out_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonFileSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into(), written: Vec::new() }
    }

    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ProfileSink for JsonFileSink {
    fn write(&mut self, profile: &Profile) -> Result<(), SinkError> {
        let path = output_path(&self.out_dir, OutputFormat::Json, profile)?;
        let io_err = |source| SinkError::Write { path: path.clone(), source };

        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, profile)?;
        writer.flush().map_err(io_err)?;

        info!("Wrote {} ({} samples)", path.display(), profile.samples.len());
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FunctionId, LocationId, Pid};
    use crate::profile::{Function, FunctionOrigin, Location, Sample, ValueType};

    #[test]
    fn test_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut location = Location::new(LocationId(1), 0x4000);
        location.bind(FunctionId(1)).unwrap();
        let profile = Profile {
            partition: Some(Pid(99)),
            period_type: ValueType::new("cpu", "nanoseconds"),
            period: 10_000_000,
            sample_types: vec![ValueType::new("samples", "count")],
            samples: vec![Sample { locations: vec![LocationId(1)], value: 4 }],
            locations: vec![location],
            functions: vec![Function {
                id: FunctionId(1),
                name: "0x4000".to_string(),
                origin: FunctionOrigin::User,
            }],
            time_nanos: 0,
            duration_nanos: 1_000_000_000,
        };

        let mut sink = JsonFileSink::new(dir.path());
        sink.write(&profile).unwrap();

        let path = &sink.written()[0];
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("profile-99-"));
        assert!(name.ends_with(".json"));

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["partition"], 99);
        assert_eq!(value["samples"][0]["value"], 4);
        assert_eq!(value["functions"][0]["origin"], "user");
        assert_eq!(value["period_type"]["type"], "cpu");
    }
}
