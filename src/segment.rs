//! Segment Index: the ordered map of segment name to `LogPart`, persisted
//! through the metadata store and rebuilt from it at recovery.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::meta_store::MetaStore;

/// Immutable descriptor for one on-disk segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPart {
    pub start_index: u64,
    pub name: String,
}

impl LogPart {
    /// Pack as `start_index: u64 LE | name_len: u32 LE | name bytes incl. trailing NUL`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut name_bytes = self.name.clone().into_bytes();
        name_bytes.push(0);

        let mut buf = Vec::with_capacity(8 + 4 + name_bytes.len());
        buf.extend_from_slice(&self.start_index.to_le_bytes());
        buf.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&name_bytes);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 12 {
            return Err(Error::Corrupt("segment descriptor too short"));
        }
        let start_index = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let name_len = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        let name_end = 12usize
            .checked_add(name_len)
            .ok_or(Error::Corrupt("segment descriptor name length overflow"))?;
        if buf.len() < name_end {
            return Err(Error::Corrupt("segment descriptor truncated"));
        }
        let name_bytes = &buf[12..name_end];
        let name_bytes = name_bytes.strip_suffix(&[0]).unwrap_or(name_bytes);
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| Error::Corrupt("segment name not utf8"))?
            .to_string();
        Ok(Self { start_index, name })
    }
}

/// Zero-pad `ordinal` to an 8-digit decimal segment file name.
pub fn pad8(ordinal: u64) -> String {
    format!("{ordinal:08}.log")
}

/// In-memory ordered map of segment name to [`LogPart`].
///
/// Ordered by `BTreeMap` over the (lexicographically sortable, by
/// construction) segment name, which tracks creation order.
#[derive(Debug, Default)]
pub struct SegmentIndex {
    parts: BTreeMap<String, LogPart>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self {
            parts: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn insert(&mut self, part: LogPart) {
        self.parts.insert(part.name.clone(), part);
    }

    /// Ascending iteration by segment name (= creation order).
    pub fn iter(&self) -> impl Iterator<Item = &LogPart> {
        self.parts.values()
    }

    pub fn last(&self) -> Option<&LogPart> {
        self.parts.values().next_back()
    }

    /// Rebuild from every descriptor under the metadata store's `/logs/`
    /// prefix. Does not touch `log_offset`, `last_log_index`, or
    /// `last_log_term`; those are a known gap in recovery (they start at
    /// zero / config default after a restart).
    pub fn recover(store: &MetaStore) -> Result<Self> {
        let mut index = Self::new();
        for (_key, value) in store.scan_logs()? {
            index.insert(LogPart::from_bytes(&value)?);
        }
        Ok(index)
    }

    /// Compute the descriptor for the next segment without persisting it
    /// or touching `self`. The rollover ordering requires the segment
    /// file be opened against this name before its descriptor is
    /// committed (see [`SegmentIndex::commit_part`]), so naming and
    /// persisting are split into two steps.
    pub fn next_part(&self, start_index: u64) -> LogPart {
        let name = pad8(self.parts.len() as u64);
        LogPart { start_index, name }
    }

    /// Synchronously persist `part`'s descriptor to the metadata store.
    /// Callers must only reach this after the segment file itself is
    /// open, so a failure here never leaves a descriptor pointing at a
    /// file that doesn't exist.
    pub fn commit_part(&self, store: &MetaStore, part: &LogPart) -> Result<()> {
        store.put_sync(&MetaStore::logs_key(&part.name), &part.to_bytes())
    }

    /// Allocate the name for the next segment and persist its descriptor
    /// in one step, for callers with no segment file to open first (test
    /// fixtures building a `SegmentIndex` directly on top of a
    /// `MetaStore`). Production rollover uses [`SegmentIndex::next_part`]
    /// and [`SegmentIndex::commit_part`] separately so the file can be
    /// opened in between.
    pub fn allocate_next(&self, store: &MetaStore, start_index: u64) -> Result<LogPart> {
        let part = self.next_part(start_index);
        self.commit_part(store, &part)?;
        Ok(part)
    }

    /// Select a segment for a target log index per the configured rule.
    ///
    /// `Corrected`: the last segment whose `start_index <= offset`.
    /// `Legacy`: the first segment whose `start_index >= offset`, which
    /// skips the segment actually containing `offset` whenever `offset`
    /// falls strictly inside it.
    pub fn select_for_offset(
        &self,
        offset: u64,
        rule: crate::config::SegmentSelection,
    ) -> Option<&LogPart> {
        match rule {
            crate::config::SegmentSelection::Legacy => {
                self.parts.values().find(|part| part.start_index >= offset)
            }
            crate::config::SegmentSelection::Corrected => self
                .parts
                .values()
                .rev()
                .find(|part| part.start_index <= offset),
        }
    }
}
