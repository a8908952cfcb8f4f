//! Redis store backend.
//!
//! # Connection Pooling
//!
//! [`RedisPool`] wraps an [`r2d2`] pool and hands each operation its own
//! connection for the duration of one command.
//!
//! # Command Timeout
//!
//! Connections use read and write timeouts (5 seconds by default) so a slow
//! or unresponsive server cannot block a caller indefinitely.

mod pool;
mod store;

pub use pool::{PoolConfig, PooledConnection, RedisConnection, RedisConnectionManager, RedisPool};
pub use store::RedisStore;
