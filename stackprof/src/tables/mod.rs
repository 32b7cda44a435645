//! # Raw Kernel Tables
//!
//! The two tables the sampler fills are reached only through the
//! [`CountsTable`] and [`StackTable`] traits, so the aggregation pipeline can
//! run against the real eBPF maps ([`bpf`]) or against in-memory tables in
//! tests.
//!
//! Both traits deal in raw bytes. Decoding happens in the pipeline, where a
//! malformed entry can be counted and skipped without failing the cycle.

pub mod bpf;

use crate::domain::TableError;
use stackprof_common::{CountsKey, MAX_STACK_DEPTH};
use std::collections::HashMap;

pub use bpf::{BpfCountsTable, BpfStackTable};

/// One undecoded `COUNTS` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Sample counters keyed by (pid, kernel stack id, user stack id)
pub trait CountsTable {
    /// Every entry currently in the table, in implementation-defined order
    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, TableError>> + '_>;

    /// Remove every entry
    ///
    /// # Errors
    /// Returns [`TableError::Clear`] if some entries could not be removed
    fn clear(&mut self) -> Result<(), TableError>;
}

/// Stack traces keyed by stack id
pub trait StackTable {
    /// Raw record for `stack_id`: little-endian `u64` instruction pointers,
    /// leaf first, zero padded. `None` if the id is unknown.
    fn lookup(&self, stack_id: u32) -> Option<Vec<u8>>;

    /// Remove every stack trace
    ///
    /// # Errors
    /// Returns [`TableError::Clear`] if some stacks could not be removed
    fn clear(&mut self) -> Result<(), TableError>;
}

/// Encode frames the way the kernel stores them: exactly
/// [`MAX_STACK_DEPTH`] little-endian words, zero padded, extra frames dropped
#[must_use]
pub fn encode_raw_stack(frames: &[u64]) -> Vec<u8> {
    let mut record = vec![0u8; MAX_STACK_DEPTH * 8];
    for (slot, ip) in record.chunks_exact_mut(8).zip(frames.iter().take(MAX_STACK_DEPTH)) {
        slot.copy_from_slice(&ip.to_le_bytes());
    }
    record
}

#[derive(Debug, Clone)]
enum Row {
    Entry(RawEntry),
    Broken(String),
}

/// In-memory [`CountsTable`]
///
/// Rows keep insertion order, which makes pipeline output deterministic.
#[derive(Debug, Clone, Default)]
pub struct MemoryCountsTable {
    rows: Vec<Row>,
    fail_clear: bool,
}

impl MemoryCountsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` samples for `key`, summing with an existing entry
    pub fn insert(&mut self, key: CountsKey, count: u64) {
        let key = key.to_le_bytes().to_vec();
        for row in &mut self.rows {
            if let Row::Entry(entry) = row {
                if entry.key == key {
                    let current = crate::domain::decode_count(&entry.value).unwrap_or(0);
                    entry.value = current.saturating_add(count).to_le_bytes().to_vec();
                    return;
                }
            }
        }
        self.rows.push(Row::Entry(RawEntry { key, value: count.to_le_bytes().to_vec() }));
    }

    /// Add an entry with arbitrary bytes
    pub fn insert_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.rows.push(Row::Entry(RawEntry { key, value }));
    }

    /// Make iteration yield an error at this position
    pub fn push_iteration_error(&mut self, reason: impl Into<String>) {
        self.rows.push(Row::Broken(reason.into()));
    }

    /// Make the next `clear` fail (and leave the rows in place)
    pub fn fail_next_clear(&mut self) {
        self.fail_clear = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl CountsTable for MemoryCountsTable {
    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry, TableError>> + '_> {
        Box::new(self.rows.iter().map(|row| match row {
            Row::Entry(entry) => Ok(entry.clone()),
            Row::Broken(reason) => {
                Err(TableError::Iterate { table: "COUNTS", reason: reason.clone() })
            }
        }))
    }

    fn clear(&mut self) -> Result<(), TableError> {
        if std::mem::take(&mut self.fail_clear) {
            return Err(TableError::Clear { table: "COUNTS", failed: self.rows.len(), total: self.rows.len() });
        }
        self.rows.clear();
        Ok(())
    }
}

/// In-memory [`StackTable`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStackTable {
    stacks: HashMap<u32, Vec<u8>>,
}

impl MemoryStackTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frames` (leaf first) under `stack_id` in kernel record format
    pub fn insert(&mut self, stack_id: u32, frames: &[u64]) {
        self.stacks.insert(stack_id, encode_raw_stack(frames));
    }

    /// Store an arbitrary record under `stack_id`
    pub fn insert_raw(&mut self, stack_id: u32, record: Vec<u8>) {
        self.stacks.insert(stack_id, record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

impl StackTable for MemoryStackTable {
    fn lookup(&self, stack_id: u32) -> Option<Vec<u8>> {
        self.stacks.get(&stack_id).cloned()
    }

    fn clear(&mut self) -> Result<(), TableError> {
        self.stacks.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pid: u32, kern: i32, user: i32) -> CountsKey {
        CountsKey { comm: [0u8; 16], pid, kern_stack_id: kern, user_stack_id: user }
    }

    #[test]
    fn test_encode_raw_stack_pads_to_full_depth() {
        let record = encode_raw_stack(&[0x1, 0x2]);
        assert_eq!(record.len(), MAX_STACK_DEPTH * 8);
        assert_eq!(&record[..8], &1u64.to_le_bytes());
        assert_eq!(&record[8..16], &2u64.to_le_bytes());
        assert!(record[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_raw_stack_truncates_deep_stacks() {
        let frames: Vec<u64> = (1..=200).collect();
        let record = encode_raw_stack(&frames);
        assert_eq!(record.len(), MAX_STACK_DEPTH * 8);
        assert_eq!(&record[record.len() - 8..], &127u64.to_le_bytes());
    }

    #[test]
    fn test_memory_counts_insert_sums_same_key() {
        let mut table = MemoryCountsTable::new();
        table.insert(key(1, 2, 3), 3);
        table.insert(key(1, 2, 3), 4);
        table.insert(key(1, 2, 4), 1);

        let entries: Vec<RawEntry> = table.entries().collect::<Result<_, _>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, 7u64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_memory_counts_clear_failure_keeps_rows() {
        let mut table = MemoryCountsTable::new();
        table.insert(key(1, 2, 3), 1);
        table.fail_next_clear();

        assert!(matches!(table.clear(), Err(TableError::Clear { failed: 1, total: 1, .. })));
        assert_eq!(table.len(), 1);
        assert!(table.clear().is_ok());
        assert!(table.is_empty());
    }

    #[test]
    fn test_memory_stack_lookup() {
        let mut table = MemoryStackTable::new();
        table.insert(9, &[0xdead]);
        assert!(table.lookup(9).is_some());
        assert!(table.lookup(10).is_none());
        table.clear().unwrap();
        assert!(table.is_empty());
    }
}
