//! Error type shared by every module in this crate.
//!
//! Mirrors the hand-rolled `Error` enum style used throughout the segment
//! storage code: one variant per failure kind, `Display` for logging,
//! `std::error::Error` for `source()` chaining, and `From` impls so `?`
//! composes across I/O and metadata-store call sites.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    MetaStore(sled::Error),
    Corrupt(&'static str),
    FrameEof,
    Continuity { expected_index: u64, expected_term: u64 },
    Transport(String),
    Decode(&'static str),
    Stopped,
    WrongRole(&'static str),
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::MetaStore(err) => write!(f, "metadata store error: {err}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::FrameEof => write!(f, "end of segment"),
            Error::Continuity { expected_index, expected_term } => write!(
                f,
                "continuity check failed: expected pre_log_index={expected_index} pre_log_term={expected_term}"
            ),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Stopped => write!(f, "replicator is stopped"),
            Error::WrongRole(msg) => write!(f, "wrong role: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::MetaStore(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<sled::Error> for Error {
    fn from(value: sled::Error) -> Self {
        Error::MetaStore(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
