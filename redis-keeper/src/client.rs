//! High-level Redis client
//!
//! [`Client`] binds a pool, an executor and the pipeline factory to one
//! configured endpoint. Typed command helpers live in [`crate::commands`].

use crate::connection::{ConnectionFactory, TcpConnector};
use crate::executor::Executor;
use crate::pipeline::Pipeline;
use crate::pool::{Pool, PoolStats};
use redis_keeper_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::{Command, CommandArg},
    value::RespValue,
};
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

/// Pooled Redis client. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct Client {
    executor: Executor,
    span: Span,
}

impl Client {
    /// Connect to Redis over TCP.
    ///
    /// Log events are emitted under a `redis_keeper` span carrying the
    /// endpoint.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use redis_keeper::{Client, ConnectionConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = ConnectionConfig::new("redis://localhost:6379");
    ///     let client = Client::new(config).await?;
    ///     assert_eq!(client.ping().await?, "PONG");
    ///     Ok(())
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// [`RedisError::Config`] for an invalid endpoint or pool bounds, or the
    /// error of the initial probe when `ping_on_create` is set.
    pub async fn new(config: ConnectionConfig) -> RedisResult<Self> {
        let connector = TcpConnector::new(config.clone())?;
        let span = info_span!("redis_keeper", endpoint = %connector.endpoint());
        let connector = connector.with_span(span.clone());
        Self::new_with(config, Arc::new(connector), span).await
    }

    /// Build a client over any transport.
    ///
    /// Every log event of the client, its pool and its pipelines is emitted
    /// with `span` as parent.
    ///
    /// # Errors
    ///
    /// Same as [`Client::new`].
    pub async fn new_with(
        config: ConnectionConfig,
        factory: Arc<dyn ConnectionFactory>,
        span: Span,
    ) -> RedisResult<Self> {
        let settings = config.pool.normalize()?;
        let endpoint = factory.endpoint();
        let pool = Pool::new(settings, factory, span.clone());
        let client = Self {
            executor: Executor::new(pool, span.clone()),
            span,
        };

        if config.ping_on_create {
            if let Err(e) = client.ping().await {
                warn!(parent: &client.span, endpoint = %endpoint, error = %e, "initial ping failed");
                client.close();
                return Err(e);
            }
        }

        info!(
            parent: &client.span,
            endpoint = %endpoint,
            max_active = ?settings.max_active,
            max_idle = settings.max_idle,
            "redis client ready"
        );
        Ok(client)
    }

    /// Run a command given by name and arguments and return the raw reply.
    ///
    /// # Errors
    ///
    /// See [`Executor::execute`].
    pub async fn execute<I, A>(&self, name: impl Into<String>, args: I) -> RedisResult<RespValue>
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        self.executor.execute(&Command::with_args(name, args)).await
    }

    /// Run a prepared command and return the raw reply.
    ///
    /// # Errors
    ///
    /// See [`Executor::execute`].
    pub async fn execute_command(&self, command: &Command) -> RedisResult<RespValue> {
        self.executor.execute(command).await
    }

    /// PING the server
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn ping(&self) -> RedisResult<String> {
        self.executor
            .execute(&Command::new("PING"))
            .await?
            .as_string()
    }

    /// Whether `err` means the key was absent.
    #[must_use]
    pub const fn is_nil(&self, err: &RedisError) -> bool {
        err.is_nil()
    }

    /// Create a pipeline.
    ///
    /// `retry` is the total number of attempts per batch (0 is read as 1) and
    /// `command_hint` the expected batch size (0 is read as 2).
    #[must_use]
    pub fn pipeline(&self, retry: usize, command_hint: usize) -> Pipeline {
        Pipeline::new(
            self.executor.pool().clone(),
            retry,
            command_hint,
            self.span.clone(),
        )
    }

    /// Pool counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.executor.pool().stats()
    }

    /// The underlying pool, for callers that manage connections themselves
    #[must_use]
    pub fn pool(&self) -> &Pool {
        self.executor.pool()
    }

    /// Shut the pool down. Idle connections are closed immediately and
    /// borrowed ones when they come back. Later calls fail with
    /// [`RedisError::PoolClosed`].
    pub fn close(&self) {
        if !self.executor.pool().is_closed() {
            self.executor.pool().close();
            info!(parent: &self.span, "redis client closed");
        }
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }
}
