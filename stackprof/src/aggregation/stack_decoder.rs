//! Stack id → address sequence

use crate::domain::{SampleKey, StackId};
use crate::tables::StackTable;
use log::debug;
use stackprof_common::MAX_STACK_DEPTH;

/// Both halves of a sample after decoding, leaf first
///
/// This is the deduplication key: two samples with equal address sequences
/// are the same stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResolvedStack {
    pub kernel: Vec<u64>,
    pub user: Vec<u64>,
}

impl ResolvedStack {
    #[must_use]
    pub fn new(kernel: Vec<u64>, user: Vec<u64>) -> Self {
        Self { kernel, user }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty() && self.user.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.kernel.len() + self.user.len()
    }
}

/// Expands stack ids using a [`StackTable`]
pub struct StackDecoder<'a> {
    stacks: &'a dyn StackTable,
}

impl<'a> StackDecoder<'a> {
    #[must_use]
    pub fn new(stacks: &'a dyn StackTable) -> Self {
        Self { stacks }
    }

    /// Addresses for one stack id; empty if the id is negative or unknown
    #[must_use]
    pub fn decode(&self, stack_id: StackId) -> Vec<u64> {
        let Some(key) = stack_id.as_map_key() else {
            return Vec::new();
        };

        match self.stacks.lookup(key) {
            Some(record) => decode_raw_stack(&record),
            None => {
                debug!("{stack_id} not found in stack table");
                Vec::new()
            }
        }
    }

    #[must_use]
    pub fn resolve(&self, key: &SampleKey) -> ResolvedStack {
        ResolvedStack {
            kernel: self.decode(key.kernel_stack_id),
            user: self.decode(key.user_stack_id),
        }
    }
}

/// Decode a little-endian record into at most [`MAX_STACK_DEPTH`] words,
/// dropping trailing zero padding
#[must_use]
pub fn decode_raw_stack(record: &[u8]) -> Vec<u64> {
    let mut frames: Vec<u64> = record
        .chunks_exact(8)
        .take(MAX_STACK_DEPTH)
        .map(|word| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            u64::from_le_bytes(bytes)
        })
        .collect();

    while frames.last() == Some(&0) {
        frames.pop();
    }
    frames
}
