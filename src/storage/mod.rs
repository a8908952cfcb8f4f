//! Storage layer abstraction.
//!
//! Dedup records live in a string key-value store reached through the
//! [`KeyValueStore`] trait:
//! - **Redis**: the shared production store, over a bounded connection pool
//! - **Memory**: in-process store with the same semantics, for tests

// Allow significant_drop_tightening - returning pooled connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::InMemoryStore;
pub use redis::{
    PoolConfig, PooledConnection, RedisConnection, RedisConnectionManager, RedisPool, RedisStore,
};
pub use traits::{KeyValueStore, Lookup, Removal, SetIfAbsent};
