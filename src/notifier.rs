//! Wakeup protocol between the append path and a replicator's background
//! task (the Follower Pusher on a leader, the Applier on a follower).
//!
//! One mutex-guarded counter plus one condition variable: `notify_one`
//! bumps the counter and wakes the waiter immediately on a successful
//! append; `wait_timeout` otherwise wakes on its own every `tick` so the
//! background loop still makes progress (retry buffer drains, catch-up
//! polling) even without a fresh append.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct Notifier {
    seq: Mutex<u64>,
    cv: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Wake the background task immediately. Called after an append
    /// becomes durable.
    pub fn notify_one(&self) {
        let mut seq = self.seq.lock().unwrap();
        *seq = seq.wrapping_add(1);
        self.cv.notify_one();
    }

    /// Block until either `notify_one` is called or `tick` elapses,
    /// whichever comes first.
    pub fn wait_timeout(&self, tick: Duration) {
        let seq = self.seq.lock().unwrap();
        let start = *seq;
        let (guard, _timed_out) = self
            .cv
            .wait_timeout_while(seq, tick, |current| *current == start)
            .unwrap();
        drop(guard);
    }
}
