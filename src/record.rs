//! Wire representation of a single log entry.
//!
//! A `LogEntry` is the payload carried inside each framed record (see
//! [`crate::framing`]). Encoding is manual little-endian packing in the
//! style of `MessageHeader::to_bytes`/`from_bytes`: fixed-width fields
//! first, variable-length key/value bytes last, no external codec.

use crate::error::{Error, Result};

/// One committed entry in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonically increasing position of this entry in the log.
    pub log_index: u64,
    /// Term in effect when this entry was appended.
    pub term: u64,
    /// Timestamp assigned by the leader, nanoseconds since epoch.
    pub timestamp_ns: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

const FIXED_LEN: usize = 8 + 8 + 8 + 4 + 4;

impl LogEntry {
    pub fn new(log_index: u64, term: u64, timestamp_ns: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            log_index,
            term,
            timestamp_ns,
            key,
            value,
        }
    }

    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.key.len() + self.value.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.log_index.to_le_bytes());
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_LEN {
            return Err(Error::Decode("entry shorter than fixed header"));
        }
        let log_index = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let term = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let timestamp_ns = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let key_len = u32::from_le_bytes(buf[24..28].try_into().unwrap()) as usize;
        let value_len = u32::from_le_bytes(buf[28..32].try_into().unwrap()) as usize;

        let key_start = FIXED_LEN;
        let key_end = key_start
            .checked_add(key_len)
            .ok_or(Error::Decode("key length overflow"))?;
        let value_end = key_end
            .checked_add(value_len)
            .ok_or(Error::Decode("value length overflow"))?;
        if buf.len() < value_end {
            return Err(Error::Decode("entry truncated"));
        }

        Ok(Self {
            log_index,
            term,
            timestamp_ns,
            key: buf[key_start..key_end].to_vec(),
            value: buf[key_end..value_end].to_vec(),
        })
    }
}
