//! Key-value store trait.

use crate::Result;
use std::time::Duration;

/// Outcome of a create-if-absent write (`SETNX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetIfAbsent {
    /// The key did not exist and now holds the value.
    Created,
    /// The key already existed; its value was left untouched.
    AlreadyExisted,
}

/// Outcome of a read (`GET`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key holds this string value.
    Found(String),
    /// No value exists for the key.
    Missing,
}

/// Outcome of an explicit removal (`DEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The key existed and was removed.
    Removed,
    /// Nothing was stored under the key.
    Missing,
}

/// Trait for the string key-value store holding dedup records.
///
/// Implementations map raw store replies to the closed outcome types above
/// so callers never inspect reply shapes. All methods are single round trips
/// with no retry; any failure is returned as [`crate::Error::Store`].
pub trait KeyValueStore: Send + Sync {
    /// Writes `value` only if `key` has no value, atomically.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<SetIfAbsent>;

    /// Writes `value` unconditionally; the entry expires after `ttl`.
    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Lookup>;

    /// Removes `key`.
    fn delete(&self, key: &str) -> Result<Removal>;
}
