//! Redis implementation of [`KeyValueStore`].

use super::pool::{PoolConfig, RedisPool};
use crate::config::DedupConfig;
use crate::storage::traits::{KeyValueStore, Lookup, Removal, SetIfAbsent};
use crate::{Error, Result};
use redis::{Connection, ConnectionInfo, RedisResult};
use std::time::Duration;

/// Redis-backed key-value store.
///
/// Every method borrows one connection from the pool for the duration of a
/// single command.
#[derive(Debug)]
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Creates a store for the given connection info.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::InvalidInput`] if the connection
    /// info or pool bounds are rejected.
    pub fn open(info: ConnectionInfo, pool_config: PoolConfig) -> Result<Self> {
        RedisPool::new(info, pool_config).map(Self::new)
    }

    /// Creates a store from process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::InvalidInput`] if the connection
    /// settings are invalid.
    pub fn from_config(config: &DedupConfig) -> Result<Self> {
        Self::open(config.redis.connection_info()?, config.pool)
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Runs one command on a pooled connection.
    ///
    /// Connection-level failures keep the connection out of the pool.
    fn run<T>(
        &self,
        operation: &str,
        command: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T> {
        let mut conn = self.pool.get()?;
        match command(&mut **conn) {
            Ok(reply) => {
                conn.touch();
                Ok(reply)
            },
            Err(e) => {
                conn.mark_broken_if_fatal(&e);
                Err(Error::store(operation, e))
            },
        }
    }
}

impl KeyValueStore for RedisStore {
    fn set_if_absent(&self, key: &str, value: &str) -> Result<SetIfAbsent> {
        let reply: i64 = self.run("redis_setnx", |conn| {
            redis::cmd("SETNX").arg(key).arg(value).query(conn)
        })?;

        match reply {
            1 => Ok(SetIfAbsent::Created),
            0 => Ok(SetIfAbsent::AlreadyExisted),
            other => Err(Error::store(
                "redis_setnx",
                format!("unexpected reply {other}"),
            )),
        }
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let seconds = ttl_seconds(ttl);
        self.run("redis_setex", |conn| {
            redis::cmd("SETEX")
                .arg(key)
                .arg(seconds)
                .arg(value)
                .query::<()>(conn)
        })
    }

    fn get(&self, key: &str) -> Result<Lookup> {
        let reply: Option<String> =
            self.run("redis_get", |conn| redis::cmd("GET").arg(key).query(conn))?;

        Ok(reply.map_or(Lookup::Missing, Lookup::Found))
    }

    fn delete(&self, key: &str) -> Result<Removal> {
        let removed: i64 = self.run("redis_del", |conn| redis::cmd("DEL").arg(key).query(conn))?;

        Ok(if removed > 0 {
            Removal::Removed
        } else {
            Removal::Missing
        })
    }
}

/// Converts a TTL to whole seconds for `SETEX`, rounding up, minimum one.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}
