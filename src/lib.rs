//! # dupreq
//!
//! Request deduplication backed by a shared key-value store.
//!
//! A [`RequestSnapshot`] captures the observable lifecycle of one request
//! (start, completion, status, body). The [`DedupService`] stores snapshots
//! under namespaced keys so that:
//!
//! - the first [`DedupService::register_incoming`] for an identifier wins and
//!   every later one reports [`Error::AlreadyExists`],
//! - [`DedupService::complete_outgoing`] overwrites the record with a
//!   retention window after which it expires,
//! - [`DedupService::fetch`] returns the last written snapshot.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dupreq::{DedupConfig, DedupService, RedisStore, RequestSnapshot};
//!
//! let config = DedupConfig::default().apply_env()?;
//! let store = RedisStore::from_config(&config)?;
//! let service = DedupService::new(Arc::new(store)).with_retention(config.retention);
//!
//! service.register_incoming(Some("in"), "req-1234", &RequestSnapshot::begin_now())?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{DedupConfig, RedisSettings};
pub use models::{KEY_PREFIX, RequestSnapshot, StorageKey};
pub use services::{DEFAULT_RETENTION, DedupService};
pub use storage::{
    InMemoryStore, KeyValueStore, Lookup, PoolConfig, RedisPool, RedisStore, Removal, SetIfAbsent,
};

/// Error type for dedup operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `AlreadyExists` | `register_incoming` found an existing record for the key |
/// | `NotFound` | `fetch` found no record (never written, expired or deleted) |
/// | `Store` | Connection, protocol or reply-shape failure from the store |
/// | `Decode` | A stored value is not a valid encoded snapshot |
/// | `InvalidInput` | Empty request id, malformed sub-prefix, bad CLI argument |
/// | `OperationFailed` | Config file I/O or parsing, logging initialization |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A record already exists for the key.
    ///
    /// This is the dedup signal, not a system failure.
    #[error("key already exists: {key}")]
    AlreadyExists {
        /// The namespaced store key.
        key: String,
    },

    /// No record exists for the key.
    #[error("key not found: {key}")]
    NotFound {
        /// The namespaced store key.
        key: String,
    },

    /// The store rejected a command or could not be reached.
    #[error("store operation '{operation}' failed: {cause}")]
    Store {
        /// The store operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A stored value could not be decoded into a snapshot.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-store operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true for [`Error::AlreadyExists`].
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Builds a [`Error::Store`] from any displayable cause.
    pub(crate) fn store(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for dedup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyExists {
            key: "ref_so_1234".to_string(),
        };
        assert_eq!(err.to_string(), "key already exists: ref_so_1234");

        let err = Error::store("redis_setnx", "connection refused");
        assert_eq!(
            err.to_string(),
            "store operation 'redis_setnx' failed: connection refused"
        );

        let err = Error::Decode("truncated".to_string());
        assert_eq!(err.to_string(), "decode failed: truncated");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::AlreadyExists { key: "k".into() }.is_duplicate());
        assert!(!Error::AlreadyExists { key: "k".into() }.is_not_found());
        assert!(Error::NotFound { key: "k".into() }.is_not_found());
        assert!(!Error::Decode("x".into()).is_duplicate());
    }
}
