//! In-memory key-value store for testing.
//!
//! Provides a non-persistent implementation of [`KeyValueStore`] with the
//! same create-if-absent and expiry semantics as the Redis store. Useful for
//! unit tests and for embedding the dedup service in a single process.

use crate::Result;
use crate::storage::traits::{KeyValueStore, Lookup, Removal, SetIfAbsent};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-memory store.
///
/// Expired entries are treated as absent and purged lazily on access.
///
/// # Example
///
/// ```rust
/// use dupreq::{InMemoryStore, KeyValueStore, SetIfAbsent};
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.set_if_absent("k", "v").unwrap(), SetIfAbsent::Created);
/// assert_eq!(store.set_if_absent("k", "w").unwrap(), SetIfAbsent::AlreadyExisted);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true when no live entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires the entry map, recovering from poison.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("In-memory store mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    /// Locks the map and drops `key` if it has expired.
    fn lock_purged(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut entries = self.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries
    }
}

impl KeyValueStore for InMemoryStore {
    fn set_if_absent(&self, key: &str, value: &str) -> Result<SetIfAbsent> {
        let mut entries = self.lock_purged(key);
        if entries.contains_key(key) {
            return Ok(SetIfAbsent::AlreadyExisted);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(SetIfAbsent::Created)
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Lookup> {
        let entries = self.lock_purged(key);
        Ok(entries
            .get(key)
            .map_or(Lookup::Missing, |e| Lookup::Found(e.value.clone())))
    }

    fn delete(&self, key: &str) -> Result<Removal> {
        let mut entries = self.lock_purged(key);
        Ok(match entries.remove(key) {
            Some(_) => Removal::Removed,
            None => Removal::Missing,
        })
    }
}
