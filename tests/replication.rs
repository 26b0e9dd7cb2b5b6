//! End-to-end scenarios exercising a leader and a follower replicator
//! talking over a real loopback TCP connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use binlog_replicator::{
    AppendEntriesRequest, AppendEntriesResponse, AppendEntriesServer, FollowerSpec,
    MapStateMachine, Replicator, ReplicatorConfig, SegmentSelection, StateMachine,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> ReplicatorConfig {
    ReplicatorConfig {
        segment_size_mib: 1,
        push_tick: Duration::from_millis(25),
        rpc_timeout: Duration::from_secs(2),
        rpc_connect_timeout: Duration::from_secs(1),
        stop_drain_timeout: Duration::from_millis(300),
        ..ReplicatorConfig::default()
    }
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

/// Spawns a loopback server thread that forwards every accepted
/// `AppendEntries` call into `follower.append_entries`, for as long as
/// `follower` stays running.
fn spawn_follower_server(follower: Arc<Replicator>) -> std::net::SocketAddr {
    let server = AppendEntriesServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || {
        while follower.is_running() {
            let follower = Arc::clone(&follower);
            let result = server.serve_one(move |request| {
                follower
                    .append_entries(&request)
                    .unwrap_or_else(|_| AppendEntriesResponse::error("internal error"))
            });
            if result.is_err() {
                break;
            }
        }
    });
    addr
}

#[test]
fn single_leader_appends_survive_segment_rollover() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = fast_config();
    config.segment_size_mib = 0; // any non-zero write rolls on the next append
    let leader = Replicator::open_leader(dir.path(), config, 1, Vec::new()).unwrap();

    let mut indices = Vec::new();
    for i in 0..10u64 {
        let entry = leader
            .append_entry(format!("key-{i}").into_bytes(), vec![b'x'; 64])
            .unwrap();
        indices.push(entry.log_index);
    }

    assert_eq!(indices, (0..10).collect::<Vec<_>>());
    assert!(leader.segment_parts().len() >= 2, "expected rollover across more than one segment");
    assert_eq!(leader.log_offset(), 10);
    leader.stop();
}

#[test]
fn leader_replicates_entries_to_a_loopback_follower() {
    init_logging();
    let leader_dir = tempfile::TempDir::new().unwrap();
    let follower_dir = tempfile::TempDir::new().unwrap();

    let state_machine = Arc::new(MapStateMachine::new());
    let follower = Replicator::open_follower(
        follower_dir.path(),
        fast_config(),
        Arc::clone(&state_machine) as Arc<dyn StateMachine>,
    )
    .unwrap();
    let addr = spawn_follower_server(Arc::clone(&follower));

    let leader = Replicator::open_leader(
        leader_dir.path(),
        fast_config(),
        1,
        vec![FollowerSpec {
            endpoint: addr.to_string(),
        }],
    )
    .unwrap();

    for i in 0..5u64 {
        leader
            .append_entry(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
            .unwrap();
    }

    assert!(wait_until(|| follower.last_log_index() == 4, Duration::from_secs(15)));
    assert!(wait_until(|| state_machine.get(b"k4") == Some(b"v4".to_vec()), Duration::from_secs(15)));
    assert_eq!(state_machine.get(b"k0"), Some(b"v0".to_vec()));

    leader.stop();
    follower.stop();
}

#[test]
fn follower_rejects_a_batch_with_mismatched_continuity() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let state_machine = Arc::new(MapStateMachine::new());
    let follower = Replicator::open_follower(dir.path(), fast_config(), state_machine).unwrap();

    let request = AppendEntriesRequest {
        pre_log_index: 9,
        pre_log_term: 1,
        term: 1,
        entries: vec![binlog_replicator::WireEntry {
            log_index: 10,
            term: 1,
            timestamp_ns: 0,
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        }],
    };

    let response = follower.append_entries(&request).unwrap();
    assert!(!response.is_ok());
    assert_eq!(follower.last_log_index(), 0);
    follower.stop();
}

#[test]
fn recovery_after_restart_resumes_from_the_recorded_tail() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = fast_config();
    config.segment_size_mib = 1;

    {
        let leader = Replicator::open_leader(dir.path(), config.clone(), 1, Vec::new()).unwrap();
        for i in 0..6u64 {
            leader
                .append_entry(format!("k{i}").into_bytes(), vec![b'y'; 512])
                .unwrap();
        }
        leader.stop();
    }

    let leader = Replicator::open_leader(dir.path(), config, 1, Vec::new()).unwrap();
    assert_eq!(leader.log_offset(), 6);
    assert_eq!(leader.last_log_index(), 5);

    let entry = leader.append_entry(b"k6".to_vec(), b"v6".to_vec()).unwrap();
    assert_eq!(entry.log_index, 6);
    leader.stop();
}

#[test]
fn applier_retries_a_failing_entry_until_the_state_machine_accepts_it() {
    init_logging();
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FlakyOnce {
        failed_once: AtomicUsize,
        applied: Mutex<Vec<u64>>,
    }

    impl StateMachine for FlakyOnce {
        fn apply(&self, entry: &binlog_replicator::LogEntry) -> binlog_replicator::Result<()> {
            if entry.log_index == 0 && self.failed_once.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(binlog_replicator::Error::Unsupported("simulated failure"));
            }
            self.applied.lock().unwrap().push(entry.log_index);
            Ok(())
        }
    }

    let dir = tempfile::TempDir::new().unwrap();
    let state_machine = Arc::new(FlakyOnce {
        failed_once: AtomicUsize::new(0),
        applied: Mutex::new(Vec::new()),
    });
    let follower = Replicator::open_follower(
        dir.path(),
        fast_config(),
        Arc::clone(&state_machine) as Arc<dyn StateMachine>,
    )
    .unwrap();

    let request = AppendEntriesRequest {
        pre_log_index: 0,
        pre_log_term: 0,
        term: 1,
        entries: vec![binlog_replicator::WireEntry {
            log_index: 0,
            term: 1,
            timestamp_ns: 0,
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        }],
    };
    assert!(follower.append_entries(&request).unwrap().is_ok());

    assert!(wait_until(
        || state_machine.applied.lock().unwrap().contains(&0),
        Duration::from_secs(5)
    ));
    assert_eq!(follower.apply_log_offset(), 0);
    follower.stop();
}

#[test]
fn stop_prevents_further_appends_and_drains_the_background_task() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let leader = Replicator::open_leader(dir.path(), fast_config(), 1, Vec::new()).unwrap();
    leader.append_entry(b"k".to_vec(), b"v".to_vec()).unwrap();

    assert!(leader.stop());
    assert!(!leader.is_running());
    let result = leader.append_entry(b"k2".to_vec(), b"v2".to_vec());
    assert!(matches!(result, Err(binlog_replicator::Error::Stopped)));
}

#[test]
fn legacy_segment_selection_is_still_selectable_via_config() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = fast_config();
    config.segment_selection = SegmentSelection::Legacy;
    let leader = Replicator::open_leader(dir.path(), config, 1, Vec::new()).unwrap();
    leader.append_entry(b"k".to_vec(), b"v".to_vec()).unwrap();
    assert_eq!(leader.log_offset(), 1);
    leader.stop();
}
