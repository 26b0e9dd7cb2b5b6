//! On-disk record framing.
//!
//! Each record is written as `len:u32 LE | crc32:u32 LE | payload`. The
//! checksum covers the payload only, mirroring the CRC placement in
//! `MessageHeader` (`crc32fast::Hasher` over the payload bytes). Unlike
//! the mmap'd fixed-size header used for the message queue, frames here
//! are sequential and variable-length: there is no in-place commit-length
//! swap, so a writer simply appends and a reader stops at the first
//! incomplete or corrupt frame.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const FRAME_PREFIX_LEN: usize = 4 + 4;

/// Encode `payload` as a single frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut buf = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<usize> {
    let frame = encode_frame(payload);
    writer.write_all(&frame)?;
    Ok(frame.len())
}

/// Read and validate the next frame from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream (zero bytes read for the
/// length prefix). Returns [`Error::FrameEof`] when the stream ends in
/// the middle of a frame — the caller treats this the same as a missing
/// tail record and does not advance past it.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    let read = read_fill_or_eof(reader, &mut prefix)?;
    if read == 0 {
        return Ok(None);
    }
    if read < FRAME_PREFIX_LEN {
        return Err(Error::FrameEof);
    }

    let len = u32::from_le_bytes(prefix[0..4].try_into().unwrap()) as usize;
    let expected_crc = u32::from_le_bytes(prefix[4..8].try_into().unwrap());

    let mut payload = vec![0u8; len];
    if read_fill_or_eof(reader, &mut payload)? < len {
        return Err(Error::FrameEof);
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != expected_crc {
        return Err(Error::Corrupt("frame checksum mismatch"));
    }

    Ok(Some(payload))
}

/// Like `Read::read_exact` but returns the number of bytes actually read
/// instead of erroring on a short read, so the caller can distinguish a
/// clean EOF from a torn trailing frame.
fn read_fill_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}
