// SPDX-License-Identifier: Apache-2.0
//! Session persistence ports and backends.
//!
//! [`SessionStorage`] is the four-operation interface the controller
//! depends on. [`MemoryStorage`] is the default process-local backend;
//! [`KvSessionStorage`] adapts any external key-value service exposing the
//! minimal [`KeyValue`] collaborator interface (string values, millisecond
//! TTL — the shape of a Redis-like client).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Backend failure surfaced to the LSS caller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Four-operation persistence port for session records.
///
/// Keys are opaque strings (the controller uses `lss:session:{thread_id}`),
/// values are opaque bytes. A `None` from [`get`](SessionStorage::get)
/// covers both "never stored" and "expired"; expiry after the optional TTL
/// is the backend's responsibility and is measured from the most recent
/// write.
pub trait SessionStorage: Send + Sync {
    /// Read a value. `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Write a value, replacing any previous one and restarting its TTL.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError>;
    /// Remove a key. Returns the number of keys removed (0 or 1).
    fn delete(&self, key: &str) -> Result<u64, StorageError>;
    /// List live keys starting with `prefix`. Need not be consistent with
    /// concurrent writes.
    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Process-local backend: a locked map of `key → (bytes, expiry)`.
///
/// Expired entries are evicted lazily by `get` and `scan` before they
/// answer, so short TTLs are observable within one wall-clock tick.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, Option<Instant>)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn evict_expired(entries: &mut HashMap<String, (Vec<u8>, Option<Instant>)>) {
    let now = Instant::now();
    entries.retain(|_, (_, expiry)| expiry.map_or(true, |at| at > now));
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut entries = self.locked();
        evict_expired(&mut entries);
        Ok(entries.get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError> {
        let expiry = ttl.map(|ttl| Instant::now() + ttl);
        self.locked().insert(key.to_owned(), (value, expiry));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<u64, StorageError> {
        Ok(u64::from(self.locked().remove(key).is_some()))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut entries = self.locked();
        evict_expired(&mut entries);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Minimal interface of an external key-value collaborator.
///
/// String values, millisecond TTL on write, prefix key scans. The concrete
/// client (Redis or otherwise) lives outside this crate; only this shape is
/// assumed.
pub trait KeyValue: Send + Sync {
    /// Read a value. `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Write a value with an optional time-to-live in milliseconds.
    fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> Result<(), StorageError>;
    /// Remove a key, returning how many were removed.
    fn delete(&self, key: &str) -> Result<u64, StorageError>;
    /// List live keys starting with `prefix`.
    fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Adapts a [`KeyValue`] collaborator to the [`SessionStorage`] port.
///
/// Session records are UTF-8 JSON, so the byte/string conversion is exact.
pub struct KvSessionStorage<B> {
    backend: B,
}

impl<B> KvSessionStorage<B> {
    /// Wrap an external key-value client.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: KeyValue> SessionStorage for KvSessionStorage<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.backend.get(key)?.map(String::into_bytes))
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError> {
        let text = String::from_utf8(value)
            .map_err(|err| StorageError::Backend(format!("non-UTF-8 session record: {err}")))?;
        let ttl_ms = ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self.backend.set(key, &text, ttl_ms)
    }

    fn delete(&self, key: &str) -> Result<u64, StorageError> {
        self.backend.delete(key)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.backend.scan_keys(prefix)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// In-memory stand-in for an external KV service, with the same lazy
    /// eviction discipline the real one would provide.
    #[derive(Default)]
    pub(crate) struct FakeKv {
        entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    }

    impl FakeKv {
        fn locked(&self) -> MutexGuard<'_, HashMap<String, (String, Option<Instant>)>> {
            match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            }
        }

        fn evict(entries: &mut HashMap<String, (String, Option<Instant>)>) {
            let now = Instant::now();
            entries.retain(|_, (_, expiry)| expiry.map_or(true, |at| at > now));
        }
    }

    impl KeyValue for FakeKv {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            let mut entries = self.locked();
            Self::evict(&mut entries);
            Ok(entries.get(key).map(|(value, _)| value.clone()))
        }

        fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> Result<(), StorageError> {
            let expiry = ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
            self.locked()
                .insert(key.to_owned(), (value.to_owned(), expiry));
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<u64, StorageError> {
            Ok(u64::from(self.locked().remove(key).is_some()))
        }

        fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            let mut entries = self.locked();
            Self::evict(&mut entries);
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort_unstable();
            Ok(keys)
        }
    }

    // ── 1. set/get round-trip ───────────────────────────────────────────

    #[test]
    fn memory_set_get_round_trip() {
        let store = MemoryStorage::new();
        store.set("k1", b"value".to_vec(), None).unwrap();
        assert_eq!(store.get("k1").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    // ── 2. delete reports removal count ─────────────────────────────────

    #[test]
    fn memory_delete_counts() {
        let store = MemoryStorage::new();
        store.set("k1", b"v".to_vec(), None).unwrap();
        assert_eq!(store.delete("k1").unwrap(), 1);
        assert_eq!(store.delete("k1").unwrap(), 0);
        assert_eq!(store.get("k1").unwrap(), None);
    }

    // ── 3. scan filters by prefix, sorted ───────────────────────────────

    #[test]
    fn memory_scan_filters_prefix() {
        let store = MemoryStorage::new();
        store.set("lss:session:b", b"1".to_vec(), None).unwrap();
        store.set("lss:session:a", b"1".to_vec(), None).unwrap();
        store.set("other:x", b"1".to_vec(), None).unwrap();
        let keys = store.scan("lss:session:").unwrap();
        assert_eq!(keys, vec!["lss:session:a", "lss:session:b"]);
    }

    // ── 4. TTL expiry is observable through get and scan ────────────────

    #[test]
    fn memory_ttl_expires() {
        let store = MemoryStorage::new();
        store
            .set("short", b"v".to_vec(), Some(Duration::from_millis(10)))
            .unwrap();
        assert!(store.get("short").unwrap().is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("short").unwrap(), None);
        assert!(store.scan("short").unwrap().is_empty());
    }

    // ── 5. a fresh write restarts the TTL ───────────────────────────────

    #[test]
    fn memory_write_restarts_ttl() {
        let store = MemoryStorage::new();
        store
            .set("k", b"v1".to_vec(), Some(Duration::from_millis(20)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        store
            .set("k", b"v2".to_vec(), Some(Duration::from_millis(20)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(15));
        // 25ms after the first write, 15ms after the second: still live.
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
    }

    // ── 6. KV adapter delegates with byte/string conversion ─────────────

    #[test]
    fn kv_adapter_round_trip() {
        let store = KvSessionStorage::new(FakeKv::default());
        store.set("k", br#"{"a":1}"#.to_vec(), None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(br#"{"a":1}"#.to_vec()));
        assert_eq!(store.scan("k").unwrap(), vec!["k"]);
        assert_eq!(store.delete("k").unwrap(), 1);
        assert_eq!(store.get("k").unwrap(), None);
    }

    // ── 7. KV adapter honours TTL ───────────────────────────────────────

    #[test]
    fn kv_adapter_ttl_expires() {
        let store = KvSessionStorage::new(FakeKv::default());
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.get("k").unwrap(), None);
    }
}
