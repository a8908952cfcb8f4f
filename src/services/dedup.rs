//! Request dedup service.
//!
//! Records request snapshots under namespaced keys with a two-phase
//! lifecycle:
//!
//! 1. **Register**: create-if-absent write with no expiry. Only the first
//!    writer for a key succeeds; later ones get [`Error::AlreadyExists`].
//! 2. **Complete**: unconditional write with a retention window, replacing
//!    whatever was registered.
//!
//! At-most-once registration relies solely on the store's atomic
//! create-if-absent; the service holds no locks of its own.

use crate::models::{RequestSnapshot, StorageKey};
use crate::storage::traits::{KeyValueStore, Lookup, Removal, SetIfAbsent};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Default retention window for completed records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Service for registering, completing and fetching request snapshots.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use dupreq::{DedupService, InMemoryStore, RequestSnapshot};
///
/// let service = DedupService::new(Arc::new(InMemoryStore::new()));
///
/// service.register_incoming(None, "1234", &RequestSnapshot::begin_now()).unwrap();
/// let err = service
///     .register_incoming(None, "1234", &RequestSnapshot::begin_now())
///     .unwrap_err();
/// assert!(err.is_duplicate());
/// ```
#[derive(Clone)]
pub struct DedupService {
    store: Arc<dyn KeyValueStore>,
    retention: Duration,
}

impl std::fmt::Debug for DedupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupService")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl DedupService {
    /// Creates a service over a store with the default retention window.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Sets the retention window applied by [`DedupService::complete_outgoing`].
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Returns the retention window for completed records.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Records that a request was seen, once.
    ///
    /// The record has no expiry.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if a record exists for the key; the stored
    ///   value is left unchanged.
    /// - [`Error::InvalidInput`] if the key parts are invalid.
    /// - [`Error::Store`] if the store fails.
    #[instrument(
        skip(self, snapshot),
        fields(operation = "register_incoming", key = tracing::field::Empty)
    )]
    pub fn register_incoming(
        &self,
        sub_prefix: Option<&str>,
        request_id: &str,
        snapshot: &RequestSnapshot,
    ) -> Result<()> {
        let start = Instant::now();
        let key = StorageKey::new(sub_prefix, request_id)?;
        tracing::Span::current().record("key", key.as_str());

        let result = match self.store.set_if_absent(key.as_str(), &snapshot.encode()) {
            Ok(SetIfAbsent::Created) => {
                tracing::debug!("Registered incoming request");
                Ok(())
            },
            Ok(SetIfAbsent::AlreadyExisted) => {
                tracing::debug!("Duplicate incoming request");
                Err(Error::AlreadyExists {
                    key: key.into(),
                })
            },
            Err(e) => Err(e),
        };

        record_outcome("register", &result, start);
        result
    }

    /// Records a request's outcome, replacing any existing record.
    ///
    /// Valid whether or not the request was registered. The record expires
    /// after the retention window.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the key parts are invalid.
    /// - [`Error::Store`] if the store fails.
    #[instrument(
        skip(self, snapshot),
        fields(operation = "complete_outgoing", key = tracing::field::Empty)
    )]
    pub fn complete_outgoing(
        &self,
        sub_prefix: Option<&str>,
        request_id: &str,
        snapshot: &RequestSnapshot,
    ) -> Result<()> {
        let start = Instant::now();
        let key = StorageKey::new(sub_prefix, request_id)?;
        tracing::Span::current().record("key", key.as_str());

        let result =
            self.store
                .set_with_expiry(key.as_str(), &snapshot.encode(), self.retention);
        if result.is_ok() {
            tracing::debug!(
                retention_secs = self.retention.as_secs(),
                status_code = snapshot.status_code,
                "Completed outgoing request"
            );
        }

        record_outcome("complete", &result, start);
        result
    }

    /// Returns the last snapshot written for a request.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no record exists (never written, expired or
    ///   deleted).
    /// - [`Error::Decode`] if the stored value is not a valid snapshot.
    /// - [`Error::InvalidInput`] if the key parts are invalid.
    /// - [`Error::Store`] if the store fails, including a value of the wrong
    ///   type under the key.
    #[instrument(skip(self), fields(operation = "fetch", key = tracing::field::Empty))]
    pub fn fetch(&self, sub_prefix: Option<&str>, request_id: &str) -> Result<RequestSnapshot> {
        let start = Instant::now();
        let key = StorageKey::new(sub_prefix, request_id)?;
        tracing::Span::current().record("key", key.as_str());

        let result = match self.store.get(key.as_str()) {
            Ok(Lookup::Found(raw)) => RequestSnapshot::decode(&raw).inspect_err(|e| {
                tracing::warn!(error = %e, "Stored request snapshot is corrupt");
            }),
            Ok(Lookup::Missing) => Err(Error::NotFound {
                key: key.into(),
            }),
            Err(e) => Err(e),
        };

        record_outcome("fetch", &result, start);
        result
    }

    /// Deletes the record for a request.
    ///
    /// Returns true if a record was removed. This is an operator action and
    /// is not part of the dedup lifecycle.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the key parts are invalid.
    /// - [`Error::Store`] if the store fails.
    #[instrument(skip(self), fields(operation = "remove"))]
    pub fn remove(&self, sub_prefix: Option<&str>, request_id: &str) -> Result<bool> {
        let key = StorageKey::new(sub_prefix, request_id)?;
        let removed = self.store.delete(key.as_str())? == Removal::Removed;
        tracing::info!(key = %key, removed, "Removed request record");
        Ok(removed)
    }
}

/// Records outcome counters and duration for one operation.
#[allow(clippy::cast_precision_loss)] // Precision loss acceptable for duration metrics
fn record_outcome<T>(operation: &'static str, result: &Result<T>, start: Instant) {
    let outcome = match result {
        Ok(_) => "success",
        Err(Error::AlreadyExists { .. }) => "duplicate",
        Err(Error::NotFound { .. }) => "not_found",
        Err(Error::Decode(_)) => "corrupt",
        Err(Error::InvalidInput(_)) => "invalid",
        Err(Error::Store { .. } | Error::OperationFailed { .. }) => "error",
    };

    metrics::counter!(
        format!("dedup_{operation}_total"),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "dedup_operation_duration_ms",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::thread;

    fn service() -> (DedupService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (DedupService::new(store.clone()), store)
    }

    #[test]
    fn test_register_then_duplicate_is_rejected() {
        let (service, _) = service();
        let t0 = Utc::now();
        let first = RequestSnapshot::new().with_begin(t0);

        service.register_incoming(None, "1234", &first).unwrap();

        let second = RequestSnapshot::new()
            .with_begin(t0 + ChronoDuration::seconds(5))
            .with_status(500)
            .with_body("other payload");
        let err = service.register_incoming(None, "1234", &second).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { ref key } if key == "ref_so_1234"));

        let fetched = service.fetch(None, "1234").unwrap();
        assert_eq!(fetched, first);
        assert_eq!(fetched.begin, Some(t0));
        assert_eq!(fetched.status_code, 0);
        assert!(fetched.body.is_empty());
    }

    #[test]
    fn test_register_then_complete_overwrites() {
        let (service, _) = service();
        let t0 = Utc::now();
        let registered = RequestSnapshot::new().with_begin(t0);
        service.register_incoming(None, "1234", &registered).unwrap();

        let t1 = t0 + ChronoDuration::milliseconds(1500);
        let completed = registered
            .with_end(t1)
            .with_status(200)
            .with_body("hello world");
        service.complete_outgoing(None, "1234", &completed).unwrap();

        let fetched = service.fetch(None, "1234").unwrap();
        assert_eq!(fetched.status_code, 200);
        assert_eq!(fetched.body, b"hello world");
        assert_eq!(fetched.end, Some(t1));
        assert_ne!(fetched.end, fetched.begin);
    }

    #[test]
    fn test_register_rejected_after_completion() {
        let (service, _) = service();
        service
            .complete_outgoing(None, "1234", &RequestSnapshot::begin_now().complete(200, "ok"))
            .unwrap();

        let err = service
            .register_incoming(None, "1234", &RequestSnapshot::begin_now())
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn test_complete_from_absent_creates_record() {
        let (service, store) = service();
        let snapshot = RequestSnapshot::begin_now().complete(204, Vec::new());

        service.complete_outgoing(Some("out"), "abc", &snapshot).unwrap();
        service.complete_outgoing(Some("out"), "abc", &snapshot).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(service.fetch(Some("out"), "abc").unwrap(), snapshot);
    }

    #[test]
    fn test_second_completion_replaces_first() {
        let (service, store) = service();
        let request = RequestSnapshot::begin_now();
        service.register_incoming(None, "1234", &request).unwrap();

        let first = request.clone().complete(502, "upstream failed");
        service.complete_outgoing(None, "1234", &first).unwrap();
        let second = request.complete(200, "ok");
        service.complete_outgoing(None, "1234", &second).unwrap();

        let fetched = service.fetch(None, "1234").unwrap();
        assert_eq!(fetched, second);
        assert_ne!(fetched, first);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_completed_record_expires_after_retention() {
        let (service, _) = service();
        let service = service.with_retention(Duration::from_millis(50));
        service
            .complete_outgoing(None, "1234", &RequestSnapshot::begin_now())
            .unwrap();
        assert!(service.fetch(None, "1234").is_ok());

        thread::sleep(Duration::from_millis(80));
        let err = service.fetch(None, "1234").unwrap_err();
        assert!(err.is_not_found());

        // The identifier can be registered again once the record is gone.
        service
            .register_incoming(None, "1234", &RequestSnapshot::begin_now())
            .unwrap();
    }

    #[test]
    fn test_fetch_missing_is_not_found() {
        let (service, _) = service();
        let err = service.fetch(Some("in"), "nope").unwrap_err();
        assert!(matches!(err, Error::NotFound { ref key } if key == "ref_so_in_nope"));
    }

    #[test]
    fn test_sub_prefixes_are_independent() {
        let (service, _) = service();
        let incoming = RequestSnapshot::begin_now().with_body("in");
        let outgoing = RequestSnapshot::begin_now().with_body("out");

        service.register_incoming(Some("in"), "1234", &incoming).unwrap();
        service.register_incoming(Some("out"), "1234", &outgoing).unwrap();
        service
            .register_incoming(None, "1234", &RequestSnapshot::new())
            .unwrap();

        assert_eq!(service.fetch(Some("in"), "1234").unwrap().body, b"in");
        assert_eq!(service.fetch(Some("out"), "1234").unwrap().body, b"out");
    }

    #[test]
    fn test_corrupt_value_is_decode_error() {
        let (service, store) = service();
        store.set_if_absent("ref_so_1234", "ex").unwrap();

        let err = service.fetch(None, "1234").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        // The corrupt record still blocks registration.
        let err = service
            .register_incoming(None, "1234", &RequestSnapshot::begin_now())
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn test_invalid_key_parts_are_rejected_before_store() {
        let (service, store) = service();
        let err = service
            .register_incoming(Some("in_x"), "1", &RequestSnapshot::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(service.fetch(None, "").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove() {
        let (service, _) = service();
        service
            .register_incoming(None, "1234", &RequestSnapshot::begin_now())
            .unwrap();
        assert!(service.remove(None, "1234").unwrap());
        assert!(!service.remove(None, "1234").unwrap());
        assert!(service.fetch(None, "1234").unwrap_err().is_not_found());
    }

    #[test]
    fn test_concurrent_registration_has_single_winner() {
        let (service, _) = service();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                thread::spawn(move || {
                    let snapshot = RequestSnapshot::begin_now().with_status(i);
                    service.register_incoming(Some("in"), "race", &snapshot)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(Error::is_duplicate)
        );
    }

    #[test]
    fn test_default_retention_is_one_hour() {
        let (service, _) = service();
        assert_eq!(service.retention(), Duration::from_secs(3600));
    }
}
