//! Apply path: the trait the Applier background task drives each
//! decoded entry through on a follower.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::record::LogEntry;

/// Applies committed entries to whatever downstream state the follower
/// maintains. Implementations must be idempotent: the Applier retries an
/// entry indefinitely on failure (at-least-once apply), so a successful
/// re-apply of the same entry must not corrupt state.
pub trait StateMachine: Send + Sync {
    fn apply(&self, entry: &LogEntry) -> Result<()>;
}

/// Reference in-memory state machine keyed by `entry.key`, useful for
/// tests and as a template for real implementations.
#[derive(Default)]
pub struct MapStateMachine {
    state: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MapStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }
}

impl StateMachine for MapStateMachine {
    fn apply(&self, entry: &LogEntry) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .insert(entry.key.clone(), entry.value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_state_machine_applies_entries_idempotently() {
        let sm = MapStateMachine::new();
        let entry = LogEntry::new(0, 1, 0, b"k".to_vec(), b"v1".to_vec());
        sm.apply(&entry).unwrap();
        sm.apply(&entry).unwrap();
        assert_eq!(sm.len(), 1);
        assert_eq!(sm.get(b"k"), Some(b"v1".to_vec()));
    }

    #[test]
    fn map_state_machine_overwrites_on_repeated_key() {
        let sm = MapStateMachine::new();
        sm.apply(&LogEntry::new(0, 1, 0, b"k".to_vec(), b"v1".to_vec()))
            .unwrap();
        sm.apply(&LogEntry::new(1, 1, 0, b"k".to_vec(), b"v2".to_vec()))
            .unwrap();
        assert_eq!(sm.get(b"k"), Some(b"v2".to_vec()));
    }
}
