//! Write Handle: the open file a segment rollover hands to the append
//! path. One framed record per call, with byte accounting (`wsize`) for
//! the rollover threshold check — no fsync here, durability is whatever
//! the underlying `File` gives a buffered sequential writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::framing;

pub struct WriteHandle {
    writer: BufWriter<File>,
    wsize: u64,
}

impl WriteHandle {
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            wsize: 0,
        })
    }

    /// Write one framed record, returning its on-disk length.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let written = framing::write_frame(&mut self.writer, payload)?;
        self.wsize += written as u64;
        Ok(written as u64)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn wsize(&self) -> u64 {
        self.wsize
    }

    pub fn needs_roll(&self, threshold_bytes: u64) -> bool {
        self.wsize >= threshold_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_wsize() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("00000000.log");
        let mut handle = WriteHandle::open_append(&path).unwrap();
        assert_eq!(handle.wsize(), 0);

        let written = handle.append(b"hello").unwrap();
        handle.flush().unwrap();
        assert_eq!(handle.wsize(), written);
        assert!(!handle.needs_roll(1_048_576));
    }

    #[test]
    fn needs_roll_once_threshold_reached() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("00000000.log");
        let mut handle = WriteHandle::open_append(&path).unwrap();
        handle.append(&vec![0u8; 100]).unwrap();
        assert!(handle.needs_roll(50));
        assert!(!handle.needs_roll(1_000));
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("00000000.log");
        {
            let mut handle = WriteHandle::open_append(&path).unwrap();
            handle.append(b"first").unwrap();
            handle.flush().unwrap();
        }
        {
            let mut handle = WriteHandle::open_append(&path).unwrap();
            handle.append(b"second").unwrap();
            handle.flush().unwrap();
        }

        let mut file = File::open(&path).unwrap();
        let first = framing::read_frame(&mut file).unwrap().unwrap();
        let second = framing::read_frame(&mut file).unwrap().unwrap();
        assert_eq!(first, b"first");
        assert_eq!(second, b"second");
    }
}
