// Batch Store Port (Interface)
// Atomic single-key operations over a shared key-value store. No logic of its own.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Key-value store contract used by the batch engine
///
/// Every method is a single atomic operation at the store; the engine never
/// needs a multi-key transaction. Implementations:
/// - `SqliteBatchStore` (tally-infra-sqlite)
/// - `RedisBatchStore` (tally-infra-redis)
/// - `mocks::InMemoryBatchStore` (tests)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Read one hash field
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read every field of a hash (empty map if the key does not exist)
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Write one hash field
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Write one hash field only if absent; returns true if this call set it
    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Remove one hash field
    async fn hash_delete(&self, key: &str, field: &str) -> Result<()>;

    /// Add `delta` to an integer field (missing = 0) and return the new value
    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Add a member to a set; returns true if it was not already present
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Number of members in a set
    async fn set_len(&self, key: &str) -> Result<u64>;

    /// Prepend a value to a list
    async fn list_push_front(&self, key: &str, value: &str) -> Result<()>;

    /// Whole list, front to back
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    /// Does the key exist (any type)
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys; returns the number of keys that existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Set a time-to-live on an existing key (no-op for missing keys)
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Entry {
        Hash(HashMap<String, String>),
        Set(BTreeSet<String>),
        List(VecDeque<String>),
    }

    /// Single-process store with the same atomicity as the real adapters
    /// (every operation holds one lock). Expiry is recorded, not enforced.
    #[derive(Default)]
    pub struct InMemoryBatchStore {
        entries: Mutex<HashMap<String, Entry>>,
        ttls: Mutex<HashMap<String, Duration>>,
        unavailable: AtomicBool,
    }

    impl InMemoryBatchStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent operation fail with a store error
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// TTL last applied to a key
        pub fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.ttls.lock().unwrap().get(key).copied()
        }

        /// Number of live keys
        pub fn key_count(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Store("in-memory store unavailable".to_string()));
            }
            Ok(())
        }

        fn wrong_type(key: &str) -> AppError {
            AppError::Store(format!("WRONGTYPE operation against key {}", key))
        }
    }

    #[async_trait]
    impl BatchStore for InMemoryBatchStore {
        async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
            self.check()?;
            match self.entries.lock().unwrap().get(key) {
                None => Ok(None),
                Some(Entry::Hash(h)) => Ok(h.get(field).cloned()),
                Some(_) => Err(Self::wrong_type(key)),
            }
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
            self.check()?;
            match self.entries.lock().unwrap().get(key) {
                None => Ok(HashMap::new()),
                Some(Entry::Hash(h)) => Ok(h.clone()),
                Some(_) => Err(Self::wrong_type(key)),
            }
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            match entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::Hash(HashMap::new()))
            {
                Entry::Hash(h) => {
                    h.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(Self::wrong_type(key)),
            }
        }

        async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            match entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::Hash(HashMap::new()))
            {
                Entry::Hash(h) => {
                    if h.contains_key(field) {
                        Ok(false)
                    } else {
                        h.insert(field.to_string(), value.to_string());
                        Ok(true)
                    }
                }
                _ => Err(Self::wrong_type(key)),
            }
        }

        async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let now_empty = match entries.get_mut(key) {
                None => return Ok(()),
                Some(Entry::Hash(h)) => {
                    h.remove(field);
                    h.is_empty()
                }
                Some(_) => return Err(Self::wrong_type(key)),
            };
            if now_empty {
                entries.remove(key);
            }
            Ok(())
        }

        async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            match entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::Hash(HashMap::new()))
            {
                Entry::Hash(h) => {
                    let current = match h.get(field) {
                        None => 0,
                        Some(raw) => raw.parse::<i64>().map_err(|_| {
                            AppError::Store(format!("hash value is not an integer: {}", raw))
                        })?,
                    };
                    let next = current + delta;
                    h.insert(field.to_string(), next.to_string());
                    Ok(next)
                }
                _ => Err(Self::wrong_type(key)),
            }
        }

        async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            match entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::Set(BTreeSet::new()))
            {
                Entry::Set(s) => Ok(s.insert(member.to_string())),
                _ => Err(Self::wrong_type(key)),
            }
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>> {
            self.check()?;
            match self.entries.lock().unwrap().get(key) {
                None => Ok(Vec::new()),
                Some(Entry::Set(s)) => Ok(s.iter().cloned().collect()),
                Some(_) => Err(Self::wrong_type(key)),
            }
        }

        async fn set_len(&self, key: &str) -> Result<u64> {
            self.check()?;
            match self.entries.lock().unwrap().get(key) {
                None => Ok(0),
                Some(Entry::Set(s)) => Ok(s.len() as u64),
                Some(_) => Err(Self::wrong_type(key)),
            }
        }

        async fn list_push_front(&self, key: &str, value: &str) -> Result<()> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            match entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::List(VecDeque::new()))
            {
                Entry::List(l) => {
                    l.push_front(value.to_string());
                    Ok(())
                }
                _ => Err(Self::wrong_type(key)),
            }
        }

        async fn list_range(&self, key: &str) -> Result<Vec<String>> {
            self.check()?;
            match self.entries.lock().unwrap().get(key) {
                None => Ok(Vec::new()),
                Some(Entry::List(l)) => Ok(l.iter().cloned().collect()),
                Some(_) => Err(Self::wrong_type(key)),
            }
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.check()?;
            Ok(self.entries.lock().unwrap().contains_key(key))
        }

        async fn delete(&self, keys: &[String]) -> Result<u64> {
            self.check()?;
            let mut entries = self.entries.lock().unwrap();
            let mut ttls = self.ttls.lock().unwrap();
            let mut removed = 0;
            for key in keys {
                ttls.remove(key);
                if entries.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
            self.check()?;
            if self.entries.lock().unwrap().contains_key(key) {
                self.ttls.lock().unwrap().insert(key.to_string(), ttl);
            }
            Ok(())
        }
    }
}
