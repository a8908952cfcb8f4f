//! Redis integration tests.
//!
//! Runs the dedup lifecycle against a real Redis server, focusing on:
//! - SETNX / SETEX / GET / DEL reply mapping
//! - Expiry of completed records
//! - Wrong-type values surfacing as store errors
//! - Pool reuse within its size bound
//!
//! Set `DUPREQ_TEST_REDIS_HOST` (and optionally `DUPREQ_TEST_REDIS_PORT` and
//! `DUPREQ_TEST_REDIS_PASSWORD`) to enable these tests:
//!
//! ```bash
//! export DUPREQ_TEST_REDIS_HOST=localhost
//! cargo test --test redis_integration
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use dupreq::{
    DedupConfig, DedupService, Error, KeyValueStore, Lookup, PoolConfig, RedisStore, Removal,
    RequestSnapshot, SetIfAbsent,
};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Environment variable for the test Redis host.
const REDIS_HOST_ENV: &str = "DUPREQ_TEST_REDIS_HOST";

/// Returns test configuration if a server is configured, or None to skip.
fn test_config() -> Option<DedupConfig> {
    let host = env::var(REDIS_HOST_ENV).ok()?;
    let mut config = DedupConfig::default().with_host(host);
    if let Some(port) = env::var("DUPREQ_TEST_REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config = config.with_port(port);
    }
    if let Ok(password) = env::var("DUPREQ_TEST_REDIS_PASSWORD") {
        config = config.with_password(password);
    }
    Some(config)
}

/// Macro to skip tests when Redis is not available.
macro_rules! require_redis {
    () => {
        match test_config() {
            Some(config) => config,
            None => {
                eprintln!(
                    "Skipping test: {} not set. Set this environment variable to run Redis tests.",
                    REDIS_HOST_ENV
                );
                return;
            },
        }
    };
}

fn unique_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn service(config: &DedupConfig) -> (DedupService, Arc<RedisStore>) {
    let store = Arc::new(RedisStore::from_config(config).expect("valid redis config"));
    let service = DedupService::new(store.clone()).with_retention(config.retention);
    (service, store)
}

#[test]
fn test_ping() {
    let config = require_redis!();
    let store = RedisStore::from_config(&config).unwrap();
    store.pool().ping().unwrap();
}

#[test]
fn test_store_verbs() {
    let config = require_redis!();
    let store = RedisStore::from_config(&config).unwrap();
    let key = format!("ref_so_test_{}", unique_id());

    assert_eq!(store.get(&key).unwrap(), Lookup::Missing);
    assert_eq!(store.set_if_absent(&key, "a").unwrap(), SetIfAbsent::Created);
    assert_eq!(
        store.set_if_absent(&key, "b").unwrap(),
        SetIfAbsent::AlreadyExisted
    );
    assert_eq!(store.get(&key).unwrap(), Lookup::Found("a".to_string()));

    store
        .set_with_expiry(&key, "c", Duration::from_secs(60))
        .unwrap();
    assert_eq!(store.get(&key).unwrap(), Lookup::Found("c".to_string()));

    assert_eq!(store.delete(&key).unwrap(), Removal::Removed);
    assert_eq!(store.delete(&key).unwrap(), Removal::Missing);
}

#[test]
fn test_register_duplicate_and_fetch() {
    let config = require_redis!();
    let (service, _) = service(&config);
    let id = unique_id();
    let request = RequestSnapshot::begin_now();

    service.register_incoming(None, &id, &request).unwrap();
    let err = service
        .register_incoming(None, &id, &RequestSnapshot::begin_now().with_status(500))
        .unwrap_err();
    assert!(err.is_duplicate());

    let fetched = service.fetch(None, &id).unwrap();
    assert_eq!(fetched, request);

    assert!(service.remove(None, &id).unwrap());
}

#[test]
fn test_register_then_complete() {
    let config = require_redis!();
    let (service, _) = service(&config);
    let id = unique_id();
    let request = RequestSnapshot::begin_now();

    service.register_incoming(Some("in"), &id, &request).unwrap();
    thread::sleep(Duration::from_millis(100));
    let completed = request.clone().complete(200, "hello world");
    service.complete_outgoing(Some("in"), &id, &completed).unwrap();

    let fetched = service.fetch(Some("in"), &id).unwrap();
    assert_eq!(fetched.status_code, 200);
    assert_eq!(fetched.body, b"hello world");
    assert!(fetched.end > fetched.begin);

    service.remove(Some("in"), &id).unwrap();
}

#[test]
fn test_completed_record_expires() {
    let config = require_redis!();
    let config = config.with_retention(Duration::from_secs(1));
    let (service, _) = service(&config);
    let id = unique_id();

    service
        .complete_outgoing(None, &id, &RequestSnapshot::begin_now().complete(200, "x"))
        .unwrap();
    assert!(service.fetch(None, &id).is_ok());

    thread::sleep(Duration::from_millis(2100));
    assert!(service.fetch(None, &id).unwrap_err().is_not_found());
}

#[test]
fn test_wrong_type_is_store_error() {
    let config = require_redis!();
    let (service, store) = service(&config);
    let id = unique_id();
    let key = format!("ref_so_{id}");

    {
        let mut conn = store.pool().get().unwrap();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&key)
            .arg("x")
            .query(&mut **conn)
            .unwrap();
    }

    let err = service.fetch(None, &id).unwrap_err();
    assert!(matches!(err, Error::Store { .. }), "unexpected error: {err}");

    store.delete(&key).unwrap();
}

#[test]
fn test_pool_reuses_connections_within_max_size() {
    let config = require_redis!();
    let pool_config = PoolConfig {
        max_size: 2,
        ..PoolConfig::default()
    };
    let store = RedisStore::open(config.redis.connection_info().unwrap(), pool_config).unwrap();

    {
        let a = store.pool().get().unwrap();
        let b = store.pool().get().unwrap();
        assert_eq!(store.pool().connection_count(), 2);
        assert_eq!(store.pool().idle_count(), 0);
        drop((a, b));
    }
    assert_eq!(store.pool().idle_count(), 2);

    // Reuse does not open another connection.
    store.get("ref_so_missing").unwrap();
    assert_eq!(store.pool().connection_count(), 2);
}

#[test]
fn test_concurrent_registration_has_single_winner() {
    let config = require_redis!();
    let (service, _) = service(&config);
    let id = unique_id();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            let id = id.clone();
            thread::spawn(move || {
                service.register_incoming(Some("in"), &id, &RequestSnapshot::new().with_status(i))
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(Result::is_ok)
        .count();
    assert_eq!(winners, 1);

    service.remove(Some("in"), &id).unwrap();
}
