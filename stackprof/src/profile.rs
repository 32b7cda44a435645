//! Finalized profile model
//!
//! Plain data handed to a [`crate::export::ProfileSink`]. IDs are 1-based and
//! equal to the entity's position in its table plus one.

use crate::domain::{FunctionId, LocationId, Pid, RegistryError};
use serde::Serialize;

/// Where a function name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionOrigin {
    /// Resolved from the kernel symbol table
    Kernel,
    /// User-space placeholder (hex address)
    User,
    /// Kernel address with no symbol at or below it
    Unresolved,
}

impl FunctionOrigin {
    /// Value written to the pprof `system_name` field
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionOrigin::Kernel => "kernel",
            FunctionOrigin::User => "user",
            FunctionOrigin::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub origin: FunctionOrigin,
}

/// A single code address
///
/// The `(id, address)` pair is fixed at creation; the function is bound once,
/// later in the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    id: LocationId,
    address: u64,
    function: Option<FunctionId>,
}

impl Location {
    #[must_use]
    pub fn new(id: LocationId, address: u64) -> Self {
        Self { id, address, function: None }
    }

    #[must_use]
    pub fn id(&self) -> LocationId {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[must_use]
    pub fn function(&self) -> Option<FunctionId> {
        self.function
    }

    /// Attach the function this address belongs to
    ///
    /// # Errors
    /// Returns [`RegistryError::AlreadyBound`] on a second call
    pub fn bind(&mut self, function: FunctionId) -> Result<(), RegistryError> {
        if self.function.is_some() {
            return Err(RegistryError::AlreadyBound(self.id));
        }
        self.function = Some(function);
        Ok(())
    }
}

/// One deduplicated stack and its weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Leaf first: kernel frames, then user frames
    pub locations: Vec<LocationId>,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueType {
    #[serde(rename = "type")]
    pub kind: String,
    pub unit: String,
}

impl ValueType {
    pub fn new(kind: impl Into<String>, unit: impl Into<String>) -> Self {
        Self { kind: kind.into(), unit: unit.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Process this profile covers, `None` for a merged profile
    pub partition: Option<Pid>,
    pub period_type: ValueType,
    /// Nanoseconds between samples
    pub period: i64,
    pub sample_types: Vec<ValueType>,
    pub samples: Vec<Sample>,
    pub locations: Vec<Location>,
    pub functions: Vec<Function>,
    /// Cycle start, nanoseconds since the UNIX epoch
    pub time_nanos: i64,
    pub duration_nanos: i64,
}

impl Profile {
    #[must_use]
    pub fn location(&self, id: LocationId) -> Option<&Location> {
        lookup(&self.locations, id.0).filter(|l| l.id == id)
    }

    #[must_use]
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        lookup(&self.functions, id.0).filter(|f| f.id == id)
    }

    /// Function names of a sample, leaf first
    #[must_use]
    pub fn frame_names(&self, sample: &Sample) -> Vec<&str> {
        sample
            .locations
            .iter()
            .filter_map(|&id| self.location(id)?.function)
            .filter_map(|id| self.function(id))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// `"<pid>"` or `"all"`, used in output file names
    #[must_use]
    pub fn partition_label(&self) -> String {
        match self.partition {
            Some(pid) => pid.0.to_string(),
            None => "all".to_string(),
        }
    }

    /// Sum of all sample values
    #[must_use]
    pub fn total_value(&self) -> i64 {
        self.samples.iter().fold(0i64, |acc, s| acc.saturating_add(s.value))
    }
}

fn lookup<T>(table: &[T], id: u64) -> Option<&T> {
    let index = usize::try_from(id.checked_sub(1)?).ok()?;
    table.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_binds_once() {
        let mut location = Location::new(LocationId(1), 0xffff_ffff_8100_0000);
        assert!(location.bind(FunctionId(1)).is_ok());
        assert_eq!(location.bind(FunctionId(2)), Err(RegistryError::AlreadyBound(LocationId(1))));
        assert_eq!(location.function(), Some(FunctionId(1)));
    }

    #[test]
    fn test_lookup_by_id() {
        let mut location = Location::new(LocationId(1), 0x10);
        location.bind(FunctionId(1)).unwrap();
        let profile = Profile {
            partition: Some(Pid(7)),
            period_type: ValueType::new("cpu", "nanoseconds"),
            period: 10_000_000,
            sample_types: vec![ValueType::new("samples", "count")],
            samples: vec![Sample { locations: vec![LocationId(1)], value: 3 }],
            locations: vec![location],
            functions: vec![Function {
                id: FunctionId(1),
                name: "0x10".to_string(),
                origin: FunctionOrigin::User,
            }],
            time_nanos: 0,
            duration_nanos: 0,
        };

        assert!(profile.location(LocationId(0)).is_none());
        assert!(profile.location(LocationId(2)).is_none());
        assert_eq!(profile.frame_names(&profile.samples[0]), vec!["0x10"]);
        assert_eq!(profile.partition_label(), "7");
        assert_eq!(profile.total_value(), 3);
    }

    #[test]
    fn test_origin_serializes_lowercase() {
        let json = serde_json::to_string(&FunctionOrigin::Unresolved).unwrap();
        assert_eq!(json, "\"unresolved\"");
    }
}
