//! Decoding of raw `COUNTS` entries
//!
//! Keys and values arrive as untyped bytes from the counts table. The layout
//! is fixed by [`stackprof_common::CountsKey`]; anything else is a
//! [`DecodeError`] and the entry is skipped by the caller.

use super::errors::DecodeError;
use super::types::{Pid, StackId};
use stackprof_common::{COUNT_VALUE_SIZE, SAMPLE_KEY_SIZE, TASK_COMM_LEN};

/// Decoded key of one `COUNTS` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleKey {
    pub pid: Pid,
    pub kernel_stack_id: StackId,
    pub user_stack_id: StackId,
    pub comm: [u8; TASK_COMM_LEN],
}

impl SampleKey {
    /// Decode the 28-byte little-endian key written by the sampler
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::KeyLength`] if `bytes` is not exactly
    /// [`SAMPLE_KEY_SIZE`] long.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: &[u8; SAMPLE_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| DecodeError::KeyLength { expected: SAMPLE_KEY_SIZE, actual: bytes.len() })?;

        let mut comm = [0u8; TASK_COMM_LEN];
        comm.copy_from_slice(&bytes[..TASK_COMM_LEN]);

        Ok(Self {
            comm,
            pid: Pid(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]])),
            kernel_stack_id: StackId(i32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]])),
            user_stack_id: StackId(i32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]])),
        })
    }

    /// Command name up to the first NUL, lossily decoded
    #[must_use]
    pub fn comm_str(&self) -> String {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(self.comm.len());
        String::from_utf8_lossy(&self.comm[..end]).into_owned()
    }
}

/// Decode a `COUNTS` value (little-endian `u64`)
///
/// # Errors
///
/// Returns [`DecodeError::ValueLength`] unless `bytes` is exactly 8 bytes.
pub fn decode_count(bytes: &[u8]) -> Result<u64, DecodeError> {
    let bytes: [u8; COUNT_VALUE_SIZE] = bytes
        .try_into()
        .map_err(|_| DecodeError::ValueLength { expected: COUNT_VALUE_SIZE, actual: bytes.len() })?;
    Ok(u64::from_le_bytes(bytes))
}
