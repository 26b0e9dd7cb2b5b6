//! Replicator Core: the leader/follower state machine that ties the
//! Segment Index, Write Handle, and Read Cursor into the two public
//! entry points (`append_entry` on a leader, `append_entries` on a
//! follower) plus the background task each role runs (Follower Pusher,
//! Applier).
//!
//! A single [`std::sync::Mutex`] guards everything that the background
//! task and the caller thread both touch — the Segment Index, the write
//! handle, `last_log_*`, and the per-follower cursors — matching the
//! shared-mutex/condvar protocol described by the source design. RPC
//! calls are made with the lock dropped (see [`Replicator::send_and_commit`]),
//! one step beyond the source's own behavior of holding the lock across
//! I/O (see `DESIGN.md`).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::apply::StateMachine;
use crate::config::{InstancePaths, ReplicatorConfig};
use crate::error::{Error, Result};
use crate::meta_store::MetaStore;
use crate::notifier::Notifier;
use crate::read_cursor::ReadCursor;
use crate::record::LogEntry;
use crate::rpc::{AppendEntriesRequest, AppendEntriesResponse, RpcClient, TcpRpcClient, WireEntry};
use crate::segment::{LogPart, SegmentIndex};
use crate::write_handle::WriteHandle;

/// A replicator is fixed to one role for its whole lifetime; there is no
/// leader election in this design (see `SPEC_FULL.md` Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// One follower this leader pushes to, supplied at construction time —
/// the follower set is fixed for the life of the replicator.
#[derive(Debug, Clone)]
pub struct FollowerSpec {
    pub endpoint: String,
}

/// Leader-side bookkeeping for one follower. Owned exclusively by the
/// leader and mutated only while holding [`Replicator::shared`].
struct FollowerCursor {
    endpoint: String,
    /// `(last_sync_offset, last_sync_term)` of the most recently
    /// acknowledged entry. `None` means nothing has been synced yet —
    /// modeled as an `Option` rather than the literal `0` sentinel the
    /// source uses, which collides with a real entry at index 0 (see
    /// `DESIGN.md`, Open Question 2 resolution).
    synced: Option<(u64, u64)>,
    read_cursor: ReadCursor,
    retry_buffer: VecDeque<AppendEntriesRequest>,
}

impl FollowerCursor {
    fn pre_log(&self, config: &ReplicatorConfig) -> (u64, u64) {
        self.synced.unwrap_or((config.initial_log_offset, 0))
    }

    fn next_needed(&self, config: &ReplicatorConfig) -> u64 {
        self.synced.map_or(config.initial_log_offset, |(index, _)| index + 1)
    }
}

/// State shared between the caller thread and the background task,
/// guarded by a single mutex.
struct Shared {
    segments: SegmentIndex,
    write_handle: Option<WriteHandle>,
    last_log_index: u64,
    last_log_term: u64,
    /// Applier's read cursor (follower only; unused but harmless on a
    /// leader, which never drives it).
    read_cursor: ReadCursor,
    /// Leader only; empty on a follower.
    followers: Vec<FollowerCursor>,
}

pub struct Replicator {
    role: Role,
    config: ReplicatorConfig,
    paths: InstancePaths,
    meta_store: MetaStore,
    term: AtomicU64,
    log_offset: AtomicU64,
    /// Highest index consumed by the state machine (follower only).
    /// Holds `initial_log_offset.wrapping_sub(1)` until the first entry
    /// is applied — the same index-0 sentinel collision `FollowerCursor`
    /// avoids with an `Option` (see above), solved here via wraparound
    /// since this field must stay a plain atomic for lock-free reads.
    apply_log_offset: AtomicU64,
    running: AtomicBool,
    shared: Mutex<Shared>,
    notifier: Notifier,
    state_machine: Option<Arc<dyn StateMachine>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Open (or recover) a leader replicator at `root`, owning a fixed
    /// set of followers to push to.
    pub fn open_leader(
        root: impl Into<PathBuf>,
        config: ReplicatorConfig,
        term: u64,
        followers: Vec<FollowerSpec>,
    ) -> Result<Arc<Self>> {
        Self::init(root.into(), config, Role::Leader, followers, None, term)
    }

    /// Open (or recover) a follower replicator at `root`, driving
    /// `state_machine` from its Applier task.
    pub fn open_follower(
        root: impl Into<PathBuf>,
        config: ReplicatorConfig,
        state_machine: Arc<dyn StateMachine>,
    ) -> Result<Arc<Self>> {
        Self::init(root.into(), config, Role::Follower, Vec::new(), Some(state_machine), 0)
    }

    fn init(
        root: PathBuf,
        config: ReplicatorConfig,
        role: Role,
        follower_specs: Vec<FollowerSpec>,
        state_machine: Option<Arc<dyn StateMachine>>,
        term: u64,
    ) -> Result<Arc<Self>> {
        let paths = InstancePaths::new(root);
        std::fs::create_dir_all(&paths.meta_dir)?;
        std::fs::create_dir_all(&paths.log_dir)?;

        let meta_store = MetaStore::open(&paths.meta_dir)?;
        let segments = SegmentIndex::recover(&meta_store)?;
        let (log_offset, last_log_index, last_log_term) =
            recover_log_state(&paths.log_dir, &segments, &config)?;
        log::info!(
            "recovered {} segment(s): log_offset={log_offset} last_log_index={last_log_index} last_log_term={last_log_term}",
            segments.len()
        );

        let initial_log_offset = config.initial_log_offset;
        let followers = follower_specs
            .into_iter()
            .map(|spec| FollowerCursor {
                endpoint: spec.endpoint,
                synced: None,
                read_cursor: ReadCursor::new(paths.log_dir.clone()),
                retry_buffer: VecDeque::new(),
            })
            .collect();

        let shared = Shared {
            segments,
            write_handle: None,
            last_log_index,
            last_log_term,
            read_cursor: ReadCursor::new(paths.log_dir.clone()),
            followers,
        };

        let replicator = Arc::new(Self {
            role,
            config,
            paths,
            meta_store,
            term: AtomicU64::new(term),
            log_offset: AtomicU64::new(log_offset),
            apply_log_offset: AtomicU64::new(initial_log_offset.wrapping_sub(1)),
            running: AtomicBool::new(true),
            shared: Mutex::new(shared),
            notifier: Notifier::new(),
            state_machine,
            worker: Mutex::new(None),
        });

        let background = Arc::clone(&replicator);
        let spawned = match role {
            Role::Leader => thread::Builder::new()
                .name("binlog-pusher".into())
                .spawn(move || background.pusher_loop()),
            Role::Follower => thread::Builder::new()
                .name("binlog-applier".into())
                .spawn(move || background.applier_loop()),
        };
        *replicator.worker.lock().unwrap() = Some(spawned.map_err(Error::Io)?);

        Ok(replicator)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn log_offset(&self) -> u64 {
        self.log_offset.load(Ordering::Acquire)
    }

    pub fn last_log_index(&self) -> u64 {
        self.shared.lock().unwrap().last_log_index
    }

    pub fn last_log_term(&self) -> u64 {
        self.shared.lock().unwrap().last_log_term
    }

    /// Highest index the state machine has consumed. Meaningless before
    /// the first successful apply (see the field's own doc comment).
    pub fn apply_log_offset(&self) -> u64 {
        self.apply_log_offset.load(Ordering::Acquire)
    }

    pub fn segment_parts(&self) -> Vec<LogPart> {
        self.shared.lock().unwrap().segments.iter().cloned().collect()
    }

    /// Explicit wakeup of this replicator's background task, bypassing
    /// the periodic tick. `append_entry`/`append_entries` already call
    /// this on every successful write.
    pub fn notify(&self) {
        self.notifier.notify_one();
    }

    /// Leader append path. Assigns the next log index, frames and
    /// durably writes `key`/`value`, and wakes the Follower Pusher.
    pub fn append_entry(&self, key: Vec<u8>, value: Vec<u8>) -> Result<LogEntry> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if self.role != Role::Leader {
            return Err(Error::WrongRole("append_entry called on a non-leader replicator"));
        }

        let mut shared = self.shared.lock().unwrap();
        let candidate_index = self.log_offset.load(Ordering::Acquire);
        self.ensure_write_handle(&mut shared, candidate_index)?;

        let log_index = self.log_offset.fetch_add(1, Ordering::AcqRel);
        let term = self.term.load(Ordering::Acquire);
        let entry = LogEntry::new(log_index, term, now_nanos(), key, value);
        let bytes = entry.to_bytes();

        let handle = shared
            .write_handle
            .as_mut()
            .expect("write handle is ensured above");
        handle.append(&bytes)?;
        handle.flush()?;

        shared.last_log_index = entry.log_index;
        shared.last_log_term = entry.term;
        drop(shared);

        self.notifier.notify_one();
        Ok(entry)
    }

    /// Follower append path. Rejects (via a non-zero response code, not
    /// an `Err`) unless `request`'s continuity fields match the
    /// follower's own tail; writes the batch otherwise, allowing partial
    /// advance if a later entry fails.
    pub fn append_entries(&self, request: &AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if self.role != Role::Follower {
            return Err(Error::WrongRole("append_entries called on a non-follower replicator"));
        }

        let mut shared = self.shared.lock().unwrap();
        if request.pre_log_index != shared.last_log_index || request.pre_log_term != shared.last_log_term {
            log::warn!(
                "continuity check failed: have (index={}, term={}), request expects (index={}, term={})",
                shared.last_log_index,
                shared.last_log_term,
                request.pre_log_index,
                request.pre_log_term,
            );
            return Ok(AppendEntriesResponse::error(format!(
                "continuity check failed: follower tail is (index={}, term={})",
                shared.last_log_index, shared.last_log_term
            )));
        }

        for wire_entry in &request.entries {
            let entry: LogEntry = wire_entry.clone().into();
            if let Err(err) = self.ensure_write_handle(&mut shared, entry.log_index) {
                log::warn!("rollover failed while appending entry {}: {err}", entry.log_index);
                return Ok(AppendEntriesResponse::error(format!("rollover failed: {err}")));
            }

            let write_result = (|| -> Result<()> {
                let handle = shared.write_handle.as_mut().expect("write handle is ensured above");
                handle.append(&entry.to_bytes())?;
                handle.flush()?;
                Ok(())
            })();

            match write_result {
                Ok(()) => {
                    shared.last_log_index = entry.log_index;
                    shared.last_log_term = entry.term;
                    self.log_offset.store(entry.log_index + 1, Ordering::Release);
                    self.term.store(entry.term, Ordering::Release);
                }
                Err(err) => {
                    log::warn!("write failed for entry {}: {err}", entry.log_index);
                    return Ok(AppendEntriesResponse::error(format!("write failed: {err}")));
                }
            }
        }

        drop(shared);
        self.notifier.notify_one();
        Ok(AppendEntriesResponse::ok())
    }

    /// Sets `running = false`, wakes the background task, and waits up
    /// to `config.stop_drain_timeout` for it to exit. Returns `true` if
    /// the task drained within the deadline. In-flight I/O is allowed to
    /// complete; there is no forced interruption.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::Release);
        self.notifier.notify_one();

        let deadline = Instant::now() + self.config.stop_drain_timeout;
        loop {
            let finished = self
                .worker
                .lock()
                .unwrap()
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            if finished || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let mut guard = self.worker.lock().unwrap();
        match guard.take() {
            Some(handle) if handle.is_finished() => {
                let _ = handle.join();
                true
            }
            Some(handle) => {
                // Still running past the drain deadline; leave it
                // detached rather than blocking Stop() indefinitely.
                *guard = Some(handle);
                false
            }
            None => true,
        }
    }

    fn ensure_write_handle(&self, shared: &mut Shared, start_index_if_rolled: u64) -> Result<()> {
        let needs_roll = match &shared.write_handle {
            None => true,
            Some(handle) => handle.needs_roll(self.config.segment_size_bytes()),
        };
        if needs_roll {
            self.roll_write_log(shared, start_index_if_rolled)?;
        }
        Ok(())
    }

    /// `RollWriteLog`: open the next segment file, persist its
    /// descriptor synchronously, then swap it in as the live write
    /// handle. The prior handle (if any) is kept until every step
    /// succeeds, so a failure anywhere leaves the previous state intact.
    fn roll_write_log(&self, shared: &mut Shared, start_index: u64) -> Result<()> {
        let part = shared.segments.next_part(start_index);
        let handle = WriteHandle::open_append(&self.paths.log_dir.join(&part.name))?;
        shared.segments.commit_part(&self.meta_store, &part)?;

        log::info!("rolled to segment {} (start_index={start_index})", part.name);
        shared.segments.insert(part);
        shared.write_handle = Some(handle);
        Ok(())
    }

    fn pusher_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Acquire) {
            self.notifier.wait_timeout(self.config.push_tick);
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let follower_count = self.shared.lock().unwrap().followers.len();
            for index in 0..follower_count {
                if let Err(err) = self.push_one(index) {
                    log::warn!("push to follower {index} failed: {err}");
                }
            }
        }
    }

    /// `PushOne`: drain a buffered retry first; otherwise read the next
    /// record past the follower's synced tail and push it. A clean EOF
    /// (nothing new to send) and "already caught up" are both quiet
    /// no-ops, retried on the next tick.
    fn push_one(&self, index: usize) -> Result<()> {
        let retry = {
            let mut shared = self.shared.lock().unwrap();
            shared.followers[index].retry_buffer.pop_front()
        };
        if let Some(request) = retry {
            return self.send_and_commit(index, request);
        }

        let log_offset = self.log_offset.load(Ordering::Acquire);
        let (pre_log_index, pre_log_term, next_needed) = {
            let shared = self.shared.lock().unwrap();
            let cursor = &shared.followers[index];
            let (pre_index, pre_term) = cursor.pre_log(&self.config);
            (pre_index, pre_term, cursor.next_needed(&self.config))
        };
        if next_needed >= log_offset {
            return Ok(()); // fully caught up
        }

        let read_result = {
            let mut guard = self.shared.lock().unwrap();
            let Shared { segments, followers, .. } = &mut *guard;
            followers[index]
                .read_cursor
                .read_next_record(segments, next_needed, self.config.segment_selection)
        };
        let bytes = match read_result {
            Ok(bytes) => bytes,
            Err(Error::FrameEof) => return Ok(()),
            Err(err) => return Err(err),
        };
        let entry = LogEntry::from_bytes(&bytes)?;

        let request = AppendEntriesRequest {
            pre_log_index,
            pre_log_term,
            term: entry.term,
            entries: vec![WireEntry::from(&entry)],
        };
        self.send_and_commit(index, request)
    }

    /// Resolve a stub, invoke `AppendEntries`, and either advance the
    /// follower cursor on success or buffer the request for a later
    /// retry. Holds no lock while the RPC itself is in flight.
    fn send_and_commit(&self, index: usize, request: AppendEntriesRequest) -> Result<()> {
        let endpoint = self.shared.lock().unwrap().followers[index].endpoint.clone();
        let client = match TcpRpcClient::resolve(&endpoint, self.config.rpc_connect_timeout, self.config.rpc_timeout) {
            Ok(client) => client,
            Err(err) => {
                log::warn!("failed to resolve rpc stub for {endpoint}: {err}");
                return Ok(());
            }
        };

        match client.append_entries(&request) {
            Ok(response) if response.is_ok() => {
                if let Some(last) = request.entries.last() {
                    self.shared.lock().unwrap().followers[index].synced = Some((last.log_index, last.term));
                }
                Ok(())
            }
            Ok(response) => {
                log::warn!("follower {endpoint} rejected append: {}", response.message);
                self.shared.lock().unwrap().followers[index].retry_buffer.push_back(request);
                Ok(())
            }
            Err(err) => {
                log::warn!("rpc to {endpoint} failed: {err}");
                self.shared.lock().unwrap().followers[index].retry_buffer.push_back(request);
                Ok(())
            }
        }
    }

    fn applier_loop(self: Arc<Self>) {
        while self.running.load(Ordering::Acquire) {
            self.notifier.wait_timeout(self.config.push_tick);
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            if let Err(err) = self.apply_tick() {
                log::warn!("apply tick failed: {err}");
            }
        }
    }

    fn apply_tick(&self) -> Result<()> {
        let last_applied = self.apply_log_offset.load(Ordering::Acquire);
        let next_needed = last_applied.wrapping_add(1);
        let log_offset = self.log_offset.load(Ordering::Acquire);
        if next_needed >= log_offset {
            return Ok(());
        }

        let read_result = {
            let mut shared = self.shared.lock().unwrap();
            let Shared { segments, read_cursor, .. } = &mut *shared;
            read_cursor.read_next_record(segments, next_needed, self.config.segment_selection)
        };
        let bytes = match read_result {
            Ok(bytes) => bytes,
            Err(Error::FrameEof) => return Ok(()),
            Err(err) => return Err(err),
        };
        let entry = LogEntry::from_bytes(&bytes)?;

        let state_machine = self
            .state_machine
            .as_ref()
            .expect("a follower replicator always has a state machine");
        match state_machine.apply(&entry) {
            Ok(()) => {
                self.apply_log_offset.store(entry.log_index, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                // The record was already consumed from the cursor above;
                // reset it so the next tick rolls back in at `next_needed`
                // and re-reads the same entry instead of skipping past it.
                self.shared.lock().unwrap().read_cursor.reset();
                log::warn!("apply failed at index {}: {err}; will retry", entry.log_index);
                Ok(())
            }
        }
    }
}

/// Scan every segment from the start, decoding each frame, to recover
/// the index/term the source never persists (see `DESIGN.md`, Open
/// Question 2). Returns `(next_log_offset, last_log_index, last_log_term)`.
fn recover_log_state(
    log_dir: &Path,
    segments: &SegmentIndex,
    config: &ReplicatorConfig,
) -> Result<(u64, u64, u64)> {
    if segments.is_empty() {
        return Ok((config.initial_log_offset, config.initial_log_offset, 0));
    }
    let first_start = segments
        .iter()
        .next()
        .map(|part| part.start_index)
        .unwrap_or(config.initial_log_offset);

    let mut cursor = ReadCursor::new(log_dir.to_path_buf());
    let mut last: Option<LogEntry> = None;
    loop {
        match cursor.read_next_record(segments, first_start, config.segment_selection) {
            Ok(bytes) => last = Some(LogEntry::from_bytes(&bytes)?),
            Err(Error::FrameEof) => break,
            Err(err) => return Err(err),
        }
    }

    match last {
        Some(entry) => Ok((entry.log_index + 1, entry.log_index, entry.term)),
        None => Ok((config.initial_log_offset, config.initial_log_offset, 0)),
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
