//! Redis connection pool.
//!
//! Pooling is delegated to [`r2d2`]. [`RedisConnectionManager`] adds the
//! dedup idle policy on top of the `redis` crate's own manager:
//!
//! - The pool holds at most `max_size` connections, idle or borrowed.
//!   Borrowers wait up to `connect_timeout` for one to free up.
//! - An idle connection unused for longer than `idle_timeout` is closed
//!   instead of reused.
//! - A connection unused for longer than `health_check_after` is sent a
//!   `PING` before reuse and discarded if it fails. Recently used
//!   connections skip the check.
//! - A connection marked broken, or no longer open, is closed on return.
//!
//! Each borrow hands out an [`r2d2::PooledConnection`] guard that returns the
//! connection on drop, on every exit path of an operation.

use crate::{Error, Result};
use redis::{Client, Connection, ConnectionInfo, ErrorKind, RedisError};
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// A borrowed connection, returned to its pool on drop.
pub type PooledConnection = r2d2::PooledConnection<RedisConnectionManager>;

/// Connection pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections, idle or borrowed.
    pub max_size: u32,
    /// Idle connections kept open even past `idle_timeout`.
    pub min_idle: u32,
    /// Idle connections unused for longer than this are closed.
    pub idle_timeout: Duration,
    /// Connections unused for longer than this are health-checked on borrow.
    pub health_check_after: Duration,
    /// Timeout for establishing a connection or waiting for a free one.
    pub connect_timeout: Duration,
    /// Read and write timeout for commands.
    pub io_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: 0,
            idle_timeout: Duration::from_secs(60 * 60),
            health_check_after: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Checks the bounds r2d2 requires.
    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::InvalidInput("pool max_size must be positive".to_string()));
        }
        if self.min_idle > self.max_size {
            return Err(Error::InvalidInput(format!(
                "pool min_idle {} exceeds max_size {}",
                self.min_idle, self.max_size
            )));
        }
        if self.idle_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "pool idle_timeout and connect_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A pooled Redis connection with its last-use time.
pub struct RedisConnection {
    conn: Connection,
    last_used: Instant,
    broken: bool,
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("last_used", &self.last_used)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl RedisConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            last_used: Instant::now(),
            broken: false,
        }
    }

    /// Records that the connection was just used.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Prevents the connection from being reused.
    pub const fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Marks the connection broken when `err` means it is no longer usable.
    pub fn mark_broken_if_fatal(&mut self, err: &RedisError) {
        if is_connection_error(err) {
            self.mark_broken();
        }
    }
}

impl Deref for RedisConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for RedisConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// r2d2 manager applying the idle policy to `redis` connections.
pub struct RedisConnectionManager {
    client: Client,
    config: PoolConfig,
}

impl std::fmt::Debug for RedisConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl r2d2::ManageConnection for RedisConnectionManager {
    type Connection = RedisConnection;
    type Error = RedisError;

    fn connect(&self) -> std::result::Result<RedisConnection, RedisError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.config.connect_timeout)?;
        conn.set_read_timeout(Some(self.config.io_timeout))?;
        conn.set_write_timeout(Some(self.config.io_timeout))?;

        metrics::counter!("redis_pool_connections_opened_total").increment(1);
        tracing::debug!("Opened new Redis connection");
        Ok(RedisConnection::new(conn))
    }

    fn is_valid(&self, conn: &mut RedisConnection) -> std::result::Result<(), RedisError> {
        let idle_for = conn.last_used.elapsed();

        if idle_for > self.config.idle_timeout {
            return Err((ErrorKind::Client, "idle connection expired").into());
        }

        if idle_for > self.config.health_check_after {
            r2d2::ManageConnection::is_valid(&self.client, &mut conn.conn).inspect_err(|_| {
                metrics::counter!("redis_pool_health_check_failures_total").increment(1);
            })?;
        }

        conn.touch();
        Ok(())
    }

    fn has_broken(&self, conn: &mut RedisConnection) -> bool {
        conn.broken || r2d2::ManageConnection::has_broken(&self.client, &mut conn.conn)
    }
}

/// Logs connections the pool had to discard or could not open.
#[derive(Debug)]
struct TracingErrorHandler;

impl r2d2::HandleError<RedisError> for TracingErrorHandler {
    fn handle_error(&self, error: RedisError) {
        tracing::warn!(error = %error, "Redis pool discarded a connection");
    }
}

/// Pool of synchronous Redis connections.
#[derive(Clone)]
pub struct RedisPool {
    pool: r2d2::Pool<RedisConnectionManager>,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("RedisPool")
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish_non_exhaustive()
    }
}

impl RedisPool {
    /// Creates a pool for the given connection info.
    ///
    /// With the default `min_idle` of zero no connection is made until the
    /// first borrow.
    ///
    /// # Errors
    ///
    /// - [`Error::Store`] if the connection info is rejected by the client.
    /// - [`Error::InvalidInput`] if the pool bounds are invalid.
    pub fn new(info: ConnectionInfo, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::open(info).map_err(|e| Error::store("redis_connect", e))?;

        let pool = r2d2::Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(None)
            .connection_timeout(config.connect_timeout)
            .error_handler(Box::new(TracingErrorHandler))
            .build_unchecked(RedisConnectionManager { client, config });

        Ok(Self { pool })
    }

    /// Returns the number of idle connections currently held.
    #[must_use]
    pub fn idle_count(&self) -> u32 {
        self.pool.state().idle_connections
    }

    /// Returns the number of open connections, idle or borrowed.
    #[must_use]
    pub fn connection_count(&self) -> u32 {
        self.pool.state().connections
    }

    /// Borrows a connection, waiting up to `connect_timeout` for one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if no connection becomes available in time.
    pub fn get(&self) -> Result<PooledConnection> {
        self.pool
            .get()
            .map_err(|e| Error::store("redis_get_connection", e))
    }

    /// Sends a `PING` over a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if no connection can be made or the server
    /// does not answer.
    pub fn ping(&self) -> Result<()> {
        let mut conn = self.get()?;
        let reply: std::result::Result<String, RedisError> =
            redis::cmd("PING").query(&mut **conn);
        match reply {
            Ok(_) => {
                conn.touch();
                Ok(())
            },
            Err(e) => {
                conn.mark_broken_if_fatal(&e);
                Err(Error::store("redis_ping", e))
            },
        }
    }
}

/// Returns true when `err` leaves the connection unusable.
fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_timeout()
}
