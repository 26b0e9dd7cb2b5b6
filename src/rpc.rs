//! RPC transport between the Follower Pusher (leader side) and a
//! follower's `AppendEntries` endpoint.
//!
//! The wire shape is deliberately simple: one connection per call, a
//! 4-byte little-endian length prefix followed by a `serde_json` body
//! in both directions. This mirrors the source's one-shot stub-based
//! call rather than introducing a streaming protocol or connection
//! pooling, both explicitly out of scope.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::LogEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEntry {
    pub log_index: u64,
    pub term: u64,
    pub timestamp_ns: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl From<&LogEntry> for WireEntry {
    fn from(entry: &LogEntry) -> Self {
        Self {
            log_index: entry.log_index,
            term: entry.term,
            timestamp_ns: entry.timestamp_ns,
            key: entry.key.clone(),
            value: entry.value.clone(),
        }
    }
}

impl From<WireEntry> for LogEntry {
    fn from(entry: WireEntry) -> Self {
        LogEntry::new(
            entry.log_index,
            entry.term,
            entry.timestamp_ns,
            entry.key,
            entry.value,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub pre_log_index: u64,
    pub pre_log_term: u64,
    pub term: u64,
    pub entries: Vec<WireEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// `0` on success, non-zero on failure (continuity rejection, write
    /// failure, etc).
    pub code: i32,
    pub message: String,
}

impl AppendEntriesResponse {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Seam the Follower Pusher calls through — lets tests substitute an
/// in-process stub instead of a real `TcpStream`.
pub trait RpcClient: Send + Sync {
    fn append_entries(&self, request: &AppendEntriesRequest) -> Result<AppendEntriesResponse>;
}

/// `host:port` TCP client with one retry attempt at the transport layer.
pub struct TcpRpcClient {
    addr: std::net::SocketAddr,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl TcpRpcClient {
    /// Resolve `endpoint` to a callable stub. Plays the role of the
    /// source's "resolve an RPC stub for follower.endpoint" step: a
    /// malformed endpoint fails here, before any connection is attempted.
    pub fn resolve(
        endpoint: &str,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        let addr = endpoint
            .parse()
            .map_err(|_| Error::Transport(format!("invalid endpoint: {endpoint}")))?;
        Ok(Self {
            addr,
            connect_timeout,
            call_timeout,
        })
    }

    fn call_once(&self, request: &AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .map_err(|err| Error::Transport(format!("connect failed: {err}")))?;
        stream.set_read_timeout(Some(self.call_timeout))?;
        stream.set_write_timeout(Some(self.call_timeout))?;

        write_message(&mut stream, request)?;
        read_message(&mut stream)
    }
}

impl RpcClient for TcpRpcClient {
    fn append_entries(&self, request: &AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        match self.call_once(request) {
            Ok(response) => Ok(response),
            Err(_) => self.call_once(request),
        }
    }
}

/// Follower-side listener: accepts one connection at a time, decodes a
/// request, calls `handler`, and writes back the response.
pub struct AppendEntriesServer {
    listener: TcpListener,
}

impl AppendEntriesServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and service exactly one request. Intended to be called in
    /// a loop by the embedding application.
    pub fn serve_one<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce(AppendEntriesRequest) -> AppendEntriesResponse,
    {
        let (mut stream, _addr) = self.listener.accept()?;
        let request: AppendEntriesRequest = read_message(&mut stream)?;
        let response = handler(request);
        write_message(&mut stream, &response)?;
        Ok(())
    }
}

fn write_message<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(|err| Error::Transport(err.to_string()))?;
    stream.write_all(&(body.len() as u32).to_le_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<T> {
    read_message_from(stream)
}

fn read_message_from<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(|err| Error::Transport(err.to_string()))
}
