//! eBPF map adapters for the raw tables

use aya::maps::{HashMap, MapData, MapError, StackTraceMap};
use aya::sys::SyscallError;
use log::{debug, warn};
use stackprof_common::{COUNT_VALUE_SIZE, SAMPLE_KEY_SIZE};

use super::{encode_raw_stack, CountsTable, RawEntry, StackTable};
use crate::domain::TableError;

/// Name of the counts map in the eBPF object
pub const COUNTS_MAP: &str = "COUNTS";

/// Name of the stack trace map in the eBPF object
pub const STACK_TRACES_MAP: &str = "STACK_TRACES";

/// `COUNTS` map with opaque byte keys and values
pub struct BpfCountsTable {
    map: HashMap<MapData, [u8; SAMPLE_KEY_SIZE], [u8; COUNT_VALUE_SIZE]>,
}

impl BpfCountsTable {
    #[must_use]
    pub fn new(map: HashMap<MapData, [u8; SAMPLE_KEY_SIZE], [u8; COUNT_VALUE_SIZE]>) -> Self {
        Self { map }
    }
}

impl CountsTable for BpfCountsTable {
    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, TableError>> + '_> {
        Box::new(self.map.iter().map(|entry| match entry {
            Ok((key, value)) => Ok(RawEntry { key: key.to_vec(), value: value.to_vec() }),
            Err(e) => Err(TableError::Iterate { table: COUNTS_MAP, reason: e.to_string() }),
        }))
    }

    fn clear(&mut self) -> Result<(), TableError> {
        let mut failed = 0;
        let mut keys = Vec::new();
        for key in self.map.keys() {
            match key {
                Ok(key) => keys.push(key),
                Err(e) => {
                    debug!("Failed to read {COUNTS_MAP} key during clear: {e}");
                    failed += 1;
                }
            }
        }

        let total = keys.len() + failed;
        for key in &keys {
            if let Err(e) = self.map.remove(key) {
                if !is_missing_key(&e) {
                    debug!("Failed to remove {COUNTS_MAP} entry: {e}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(TableError::Clear { table: COUNTS_MAP, failed, total });
        }
        Ok(())
    }
}

/// `STACK_TRACES` map, re-encoded into fixed-depth records
pub struct BpfStackTable {
    map: StackTraceMap<MapData>,
}

impl BpfStackTable {
    #[must_use]
    pub fn new(map: StackTraceMap<MapData>) -> Self {
        Self { map }
    }
}

impl StackTable for BpfStackTable {
    fn lookup(&self, stack_id: u32) -> Option<Vec<u8>> {
        match self.map.get(&stack_id, 0) {
            Ok(trace) => {
                let frames: Vec<u64> = trace.frames().iter().map(|frame| frame.ip).collect();
                Some(encode_raw_stack(&frames))
            }
            Err(e) => {
                if !is_missing_key(&e) {
                    warn!("Failed to read stack {stack_id} from {STACK_TRACES_MAP}: {e}");
                }
                None
            }
        }
    }

    fn clear(&mut self) -> Result<(), TableError> {
        let mut failed = 0;
        let mut ids = Vec::new();
        for id in self.map.stack_ids() {
            match id {
                Ok(id) => ids.push(id),
                Err(e) => {
                    debug!("Failed to read {STACK_TRACES_MAP} id during clear: {e}");
                    failed += 1;
                }
            }
        }

        let total = ids.len() + failed;
        for id in &ids {
            if let Err(e) = self.map.remove(id) {
                if !is_missing_key(&e) {
                    debug!("Failed to remove stack {id}: {e}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(TableError::Clear { table: STACK_TRACES_MAP, failed, total });
        }
        Ok(())
    }
}

/// Entries can vanish between listing and removal (or lookup); that is not a failure
fn is_missing_key(err: &MapError) -> bool {
    match err {
        MapError::KeyNotFound => true,
        MapError::SyscallError(SyscallError { io_error, .. }) => {
            io_error.raw_os_error() == Some(libc::ENOENT)
        }
        _ => false,
    }
}
