//! Single-command execution
//!
//! Every call borrows one connection with the pool's wait budget, runs to
//! completion on it, and hands it back before returning. Transport errors
//! are returned to the caller as-is; nothing is retried here.

use crate::pool::Pool;
use redis_keeper_core::{
    error::{RedisError, RedisResult},
    types::Command,
    value::RespValue,
};
use tracing::{debug, Span};

/// Runs commands one at a time against pooled connections
#[derive(Clone)]
pub struct Executor {
    pool: Pool,
    span: Span,
}

impl Executor {
    /// Create an executor over `pool`
    pub fn new(pool: Pool, span: Span) -> Self {
        Self { pool, span }
    }

    /// The pool commands are run against
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run one command and return its reply.
    ///
    /// A missing value comes back as `RespValue::Null`; helpers built on top
    /// turn it into [`RedisError::Nil`] where a value is required.
    ///
    /// # Errors
    ///
    /// [`RedisError::Server`] when the store answers with an error reply
    /// (the connection stays pooled), a transport error when the connection
    /// failed (the connection is discarded), or an acquisition error.
    pub async fn execute(&self, command: &Command) -> RedisResult<RespValue> {
        let mut conn = self.pool.acquire(self.pool.settings().wait_timeout).await?;
        let reply = conn.request(command).await;
        drop(conn);

        match reply {
            Ok(value) => into_reply(value),
            Err(e) => {
                debug!(parent: &self.span, command = command.name(), error = %e, "command failed");
                Err(e)
            }
        }
    }

    /// Run several commands back to back on one connection, stopping at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// The first error encountered, classified as in [`Executor::execute`].
    pub async fn execute_sequence(&self, commands: &[Command]) -> RedisResult<Vec<RespValue>> {
        let mut conn = self.pool.acquire(self.pool.settings().wait_timeout).await?;
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = conn.request(command).await.map_err(|e| {
                debug!(parent: &self.span, command = command.name(), error = %e, "command failed");
                e
            })?;
            replies.push(into_reply(reply)?);
        }
        Ok(replies)
    }
}

/// Error replies become [`RedisError::Server`]
pub(crate) fn into_reply(value: RespValue) -> RedisResult<RespValue> {
    match value {
        RespValue::Error(msg) => Err(RedisError::Server(msg)),
        other => Ok(other),
    }
}
