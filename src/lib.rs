//! Segmented write-ahead log with leader/follower replication.
//!
//! A per-table append-only log, modeled after the log-replication half of
//! Raft: a leader owns the authoritative sequence of entries and pushes
//! them to a fixed set of followers; there is no election and no quorum
//! commit (see `DESIGN.md`). The log itself is a sequence of fixed-size
//! segment files tracked by a [`segment::SegmentIndex`] persisted in
//! [`meta_store::MetaStore`]; [`replicator::Replicator`] is the state
//! machine that ties everything together.

pub mod apply;
pub mod config;
pub mod error;
pub mod framing;
pub mod meta_store;
pub mod notifier;
pub mod read_cursor;
pub mod record;
pub mod replicator;
pub mod rpc;
pub mod segment;
pub mod write_handle;

pub use apply::{MapStateMachine, StateMachine};
pub use config::{ConfigError, InstancePaths, ReplicatorConfig, SegmentSelection};
pub use error::{Error, Result};
pub use record::LogEntry;
pub use replicator::{FollowerSpec, Replicator, Role};
pub use rpc::{AppendEntriesRequest, AppendEntriesResponse, AppendEntriesServer, RpcClient, TcpRpcClient, WireEntry};
pub use segment::{LogPart, SegmentIndex};
