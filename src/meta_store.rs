//! Metadata key-value store.
//!
//! Backs the segment index with an ordered, durable KV store so recovery
//! can range-scan the `/logs/` prefix in segment order without relying on
//! directory listing. `sled` plays the role the original gave to a
//! leveldb handle: ordered keys, `flush` for sync-on-write durability.

use std::path::Path;

use crate::error::Result;

pub const LOGS_PREFIX: &str = "/logs/";

/// Thin wrapper around a `sled::Db` scoped to this replicator instance.
pub struct MetaStore {
    db: sled::Db,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Write `key` -> `value` and block until it is durable.
    ///
    /// The original leveldb writer sets `options.sync = true` on every
    /// segment-index commit; `flush` is the sled equivalent.
    pub fn put_sync(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Iterate all `/logs/` entries in key order (which, thanks to the
    /// zero-padded segment names, is also segment creation order).
    pub fn scan_logs(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(LOGS_PREFIX.as_bytes()) {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| crate::error::Error::Corrupt("non-utf8 meta key"))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }

    pub fn logs_key(segment_name: &str) -> String {
        format!("{LOGS_PREFIX}{segment_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();
        store.put_sync("/logs/00000000.log", b"descriptor").unwrap();
        assert_eq!(
            store.get("/logs/00000000.log").unwrap(),
            Some(b"descriptor".to_vec())
        );
    }

    #[test]
    fn scan_logs_returns_entries_in_key_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();
        store
            .put_sync(&MetaStore::logs_key("00000002.log"), b"two")
            .unwrap();
        store
            .put_sync(&MetaStore::logs_key("00000000.log"), b"zero")
            .unwrap();
        store
            .put_sync(&MetaStore::logs_key("00000001.log"), b"one")
            .unwrap();
        store.put_sync("/other/key", b"ignored").unwrap();

        let entries = store.scan_logs().unwrap();
        let names: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            names,
            vec![
                "/logs/00000000.log",
                "/logs/00000001.log",
                "/logs/00000002.log",
            ]
        );
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetaStore::open(dir.path()).unwrap();
        assert_eq!(store.get("/logs/nope").unwrap(), None);
    }
}
