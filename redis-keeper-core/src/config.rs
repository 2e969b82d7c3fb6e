//! Configuration types for Redis connections

use crate::error::{RedisError, RedisResult};
use std::time::Duration;

/// Active-connection cap used when none is configured
pub const DEFAULT_MAX_ACTIVE: usize = 50;

/// Idle re-validation period used when none is configured
pub const DEFAULT_IDLE_PING_PERIOD: Duration = Duration::from_secs(10);

/// Pool wait budget used when none is configured
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Pool bounds as supplied by the caller.
///
/// Unset fields are `None` and receive their defaults in
/// [`PoolConfig::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of idle connections kept for reuse.
    /// Defaults to the active cap (or [`DEFAULT_MAX_ACTIVE`] when unbounded).
    pub max_idle: Option<usize>,
    /// Maximum number of connections (idle + checked out). `Some(0)` means unbounded.
    pub max_active: Option<usize>,
    /// Close idle connections left unused for longer than this
    pub idle_timeout: Option<Duration>,
    /// Probe an idle connection with PING before reuse when it has been idle this long
    pub idle_ping_period: Option<Duration>,
    /// How long a caller may wait for a connection when the pool is at its cap
    pub wait_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Set the idle cap
    #[must_use]
    pub const fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Set the active cap (0 = unbounded)
    #[must_use]
    pub const fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = Some(max_active);
        self
    }

    /// Set the idle timeout
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the idle re-validation period
    #[must_use]
    pub const fn with_idle_ping_period(mut self, period: Duration) -> Self {
        self.idle_ping_period = Some(period);
        self
    }

    /// Set the pool wait budget
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Fill in defaults and check the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] when `max_idle` exceeds a bounded `max_active`.
    pub fn normalize(&self) -> RedisResult<PoolSettings> {
        let max_active = match self.max_active.unwrap_or(DEFAULT_MAX_ACTIVE) {
            0 => None,
            n => Some(n),
        };

        let max_idle = match self.max_idle {
            Some(0) | None => max_active.unwrap_or(DEFAULT_MAX_ACTIVE),
            Some(n) => n,
        };

        if let Some(active) = max_active {
            if max_idle > active {
                return Err(RedisError::Config(format!(
                    "max_idle ({max_idle}) must not exceed max_active ({active})"
                )));
            }
        }

        Ok(PoolSettings {
            max_idle,
            max_active,
            idle_timeout: self.idle_timeout.filter(|t| !t.is_zero()),
            idle_ping_period: self.idle_ping_period.unwrap_or(DEFAULT_IDLE_PING_PERIOD),
            wait_timeout: self.wait_timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT),
        })
    }
}

/// Fully populated pool bounds, produced by [`PoolConfig::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Idle cap
    pub max_idle: usize,
    /// Active cap, `None` when unbounded
    pub max_active: Option<usize>,
    /// Idle connections unused for longer are closed; `None` keeps them forever
    pub idle_timeout: Option<Duration>,
    /// Idle age after which a connection is probed before reuse
    pub idle_ping_period: Duration,
    /// Pool wait budget
    pub wait_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_ACTIVE,
            max_active: Some(DEFAULT_MAX_ACTIVE),
            idle_timeout: None,
            idle_ping_period: DEFAULT_IDLE_PING_PERIOD,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint, e.g. `127.0.0.1:6379` or `redis://localhost:6379`
    pub connection_string: String,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database number selected on every new connection
    pub database: u8,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Read/write operation timeout
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// PING the store while constructing the client
    pub ping_on_create: bool,

    /// Pool configuration
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            ping_on_create: true,
            pool: PoolConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Enable or disable the PING issued during construction
    #[must_use]
    pub const fn with_ping_on_create(mut self, ping: bool) -> Self {
        self.ping_on_create = ping;
        self
    }

    /// Set the pool configuration
    #[must_use]
    pub const fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse the endpoint out of the connection string.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] for an empty host or a malformed port.
    pub fn endpoint(&self) -> RedisResult<(String, u16)> {
        let conn_str = self.connection_string.trim();
        let addr = conn_str
            .strip_prefix("redis://")
            .or_else(|| conn_str.strip_prefix("rediss://"))
            .unwrap_or(conn_str)
            .trim_end_matches('/');

        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    RedisError::Config(format!("invalid port in {conn_str:?}: {e}"))
                })?;
                (host, port)
            }
            // Default port 6379 if not specified
            None => (addr, 6379),
        };

        if host.is_empty() {
            return Err(RedisError::Config(format!("no host in {conn_str:?}")));
        }
        Ok((host.to_string(), port))
    }
}
