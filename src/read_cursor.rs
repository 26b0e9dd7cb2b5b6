//! Read Cursor: tracks the currently open read-only segment file and
//! implements the roll-then-retry-once record read used by both the
//! Follower Pusher and the Applier.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use crate::config::SegmentSelection;
use crate::error::{Error, Result};
use crate::framing;
use crate::segment::SegmentIndex;

struct OpenSegment {
    name: String,
    reader: BufReader<File>,
}

/// Holds at most one open segment file at a time. Rolling to a new
/// segment drops the previous one.
pub struct ReadCursor {
    log_dir: PathBuf,
    current: Option<OpenSegment>,
}

impl ReadCursor {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            current: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Drop the currently open segment, if any, so the next
    /// `read_next_record` call rolls in fresh at whatever `offset` it is
    /// given instead of continuing from wherever this cursor last read.
    /// Used to re-read an entry that was consumed but failed to apply.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Select and open the segment that should hold `offset`, per `rule`.
    /// Releases any previously held segment.
    pub fn roll_read_log(
        &mut self,
        index: &SegmentIndex,
        offset: u64,
        rule: SegmentSelection,
    ) -> Result<()> {
        let part = index
            .select_for_offset(offset, rule)
            .ok_or(Error::Corrupt("no segment available for offset"))?;
        let file = File::open(self.log_dir.join(&part.name))?;
        self.current = Some(OpenSegment {
            name: part.name.clone(),
            reader: BufReader::new(file),
        });
        Ok(())
    }

    /// Read the next record at `offset`, rolling in a segment first if
    /// the cursor is empty, and rolling forward exactly once on an
    /// end-of-segment before giving up.
    pub fn read_next_record(
        &mut self,
        index: &SegmentIndex,
        offset: u64,
        rule: SegmentSelection,
    ) -> Result<Vec<u8>> {
        if self.is_empty() {
            self.roll_read_log(index, offset, rule)?;
        }

        match self.read_one() {
            Ok(payload) => Ok(payload),
            Err(Error::FrameEof) => {
                self.roll_forward(index, rule)?;
                self.read_one()
            }
            Err(other) => Err(other),
        }
    }

    fn read_one(&mut self) -> Result<Vec<u8>> {
        let current = self.current.as_mut().ok_or(Error::FrameEof)?;
        match framing::read_frame(&mut current.reader)? {
            Some(payload) => Ok(payload),
            None => Err(Error::FrameEof),
        }
    }

    /// Roll to the segment immediately after the currently open one, if
    /// any exists; otherwise leaves the cursor empty.
    fn roll_forward(&mut self, index: &SegmentIndex, rule: SegmentSelection) -> Result<()> {
        let current_name = match &self.current {
            Some(open) => open.name.clone(),
            None => return Err(Error::FrameEof),
        };
        let mut next = None;
        for part in index.iter() {
            if part.name > current_name {
                next = Some(part.clone());
                break;
            }
        }
        let _ = rule;
        match next {
            Some(part) => {
                let file = File::open(self.log_dir.join(&part.name))?;
                self.current = Some(OpenSegment {
                    name: part.name,
                    reader: BufReader::new(file),
                });
                Ok(())
            }
            None => {
                self.current = None;
                Err(Error::FrameEof)
            }
        }
    }
}
