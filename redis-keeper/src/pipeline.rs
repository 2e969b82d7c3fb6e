//! Pipelined batches
//!
//! A [`Pipeline`] queues commands and executes them over one borrowed
//! connection: every command is written, the buffer is flushed once, then
//! exactly one reply is read per command in submission order.
//!
//! Failures are kept apart by where they happen:
//!
//! - an error reply for one command is recorded in that command's slot and
//!   never retried;
//! - a transport failure before the first reply is read fails the whole
//!   attempt, and the batch is retried on a fresh connection up to the
//!   configured number of attempts;
//! - a transport failure after some replies were read ends the batch:
//!   replies already read stay attributed and every remaining slot records
//!   the failure.
//!
//! Once the flush has started the batch may have partially reached the
//! store, so from then on it is only re-sent when every command in it is
//! idempotent.
//!
//! # Examples
//!
//! ```no_run
//! use redis_keeper::{Client, ConnectionConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ConnectionConfig::new("redis://localhost:6379")).await?;
//!
//! let pipeline = client.pipeline(3, 4);
//! pipeline.add_raw_cmd("SET", ["greeting", "hello"]);
//! pipeline.incr("visits");
//! pipeline.expire("visits", 60);
//!
//! let batch = pipeline.exec().await?;
//! if let Some(index) = batch.first_error {
//!     eprintln!("command {index} failed: {:?}", batch.results[index].error());
//! }
//! # Ok(())
//! # }
//! ```

use crate::executor::into_reply;
use crate::pool::Pool;
use redis_keeper_core::{
    error::{RedisError, RedisResult},
    types::{Command, CommandArg},
    value::RespValue,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn, Span};

const DEFAULT_COMMAND_HINT: usize = 2;

/// A queued command paired with its outcome
#[derive(Debug)]
pub struct CommandResult {
    /// The command as it was queued
    pub command: Command,
    /// Reply, or the error recorded for this command
    pub outcome: RedisResult<RespValue>,
}

impl CommandResult {
    /// Command name
    #[must_use]
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Command arguments
    #[must_use]
    pub fn args(&self) -> &[CommandArg] {
        self.command.args()
    }

    /// The reply, if the command succeeded
    #[must_use]
    pub fn value(&self) -> Option<&RespValue> {
        self.outcome.as_ref().ok()
    }

    /// The error, if the command failed
    #[must_use]
    pub fn error(&self) -> Option<&RedisError> {
        self.outcome.as_ref().err()
    }
}

/// Outcome of one [`Pipeline::exec`]
#[derive(Debug, Default)]
pub struct PipelineResult {
    /// One entry per queued command, in submission order
    pub results: Vec<CommandResult>,
    /// Index of the first command that failed, if any
    pub first_error: Option<usize>,
}

impl PipelineResult {
    fn new(commands: Vec<Command>, outcomes: Vec<RedisResult<RespValue>>) -> Self {
        let first_error = outcomes.iter().position(Result::is_err);
        let results = commands
            .into_iter()
            .zip(outcomes)
            .map(|(command, outcome)| CommandResult { command, outcome })
            .collect();
        Self {
            results,
            first_error,
        }
    }

    /// Number of commands executed
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether every command succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.first_error.is_none()
    }
}

/// Where an attempt failed, which decides whether it may be repeated
enum Failure {
    /// Nothing reached the store
    Unsent(RedisError),
    /// Some or all of the batch may have reached the store
    Flush(RedisError),
}

/// A reusable, shareable batch of commands.
///
/// All methods take `&self`; wrap the pipeline in an `Arc` to fill it from
/// several tasks. [`Pipeline::exec`] takes the queue atomically, so commands
/// added while a batch is in flight go into the next batch.
pub struct Pipeline {
    pool: Pool,
    queue: Mutex<Vec<Command>>,
    attempts: usize,
    command_hint: usize,
    closed: AtomicBool,
    span: Span,
}

impl Pipeline {
    /// Create a pipeline over `pool`.
    ///
    /// `retry` is the total number of attempts for a batch (0 is read as 1).
    /// `command_hint` sizes the queue (0 is read as 2).
    pub fn new(pool: Pool, retry: usize, command_hint: usize, span: Span) -> Self {
        let command_hint = if command_hint == 0 {
            DEFAULT_COMMAND_HINT
        } else {
            command_hint
        };
        Self {
            pool,
            queue: Mutex::new(Vec::with_capacity(command_hint)),
            attempts: retry.max(1),
            command_hint,
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// Total attempts made for a batch before giving up
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.attempts
    }

    /// Queue a command by name and arguments
    pub fn add_raw_cmd<I, A>(&self, name: impl Into<String>, args: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        self.add(Command::with_args(name, args));
    }

    /// Queue a prepared command. Commands queued on a closed pipeline are
    /// dropped.
    pub fn add(&self, command: Command) {
        if self.is_closed() {
            debug!(parent: &self.span, command = command.name(), "pipeline closed, command dropped");
            return;
        }
        self.queue().push(command);
    }

    /// Number of queued commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Drop every queued command without executing it
    pub fn discard(&self) {
        self.queue().clear();
    }

    /// Close the pipeline. Queued commands are dropped and later executions
    /// fail with [`RedisError::PipelineClosed`]. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.discard();
        }
    }

    /// Whether [`Pipeline::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Execute every queued command as one batch.
    ///
    /// Per-command errors, including the store's error replies, are reported
    /// in [`PipelineResult::results`] and [`PipelineResult::first_error`].
    /// An empty queue returns an empty result without touching the pool.
    ///
    /// # Errors
    ///
    /// [`RedisError::PipelineClosed`] after [`Pipeline::close`], or
    /// [`RedisError::PipelineFailed`] carrying the last attempt's error when
    /// the batch could not be delivered.
    pub async fn exec(&self) -> RedisResult<PipelineResult> {
        if self.is_closed() {
            return Err(RedisError::PipelineClosed);
        }

        let commands = std::mem::replace(
            &mut *self.queue(),
            Vec::with_capacity(self.command_hint),
        );
        if commands.is_empty() {
            return Ok(PipelineResult::default());
        }

        let idempotent = commands.iter().all(Command::is_idempotent);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (retryable, error) = match self.attempt(&commands).await {
                Ok(outcomes) => {
                    let result = PipelineResult::new(commands, outcomes);
                    if let Some(index) = result.first_error {
                        debug!(
                            parent: &self.span,
                            commands = result.len(),
                            first_error = index,
                            "pipeline completed with command errors"
                        );
                    }
                    return Ok(result);
                }
                Err(Failure::Unsent(e)) => (e.is_transport(), e),
                Err(Failure::Flush(e)) => (e.is_transport() && idempotent, e),
            };

            if !retryable || attempt >= self.attempts {
                warn!(
                    parent: &self.span,
                    attempt,
                    commands = commands.len(),
                    error = %error,
                    "pipeline failed"
                );
                return Err(RedisError::PipelineFailed {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }
            warn!(
                parent: &self.span,
                attempt,
                max_attempts = self.attempts,
                error = %error,
                "pipeline attempt failed, retrying"
            );
        }
    }

    async fn attempt(&self, commands: &[Command]) -> Result<Vec<RedisResult<RespValue>>, Failure> {
        // Commands are only written once a connection is in hand, so a stale
        // pooled connection is caught by the pool's probe first.
        let mut conn = self
            .pool
            .acquire(self.pool.settings().wait_timeout)
            .await
            .map_err(Failure::Unsent)?;

        for command in commands {
            conn.send(command).await.map_err(Failure::Unsent)?;
        }
        conn.flush().await.map_err(Failure::Flush)?;

        let mut outcomes = Vec::with_capacity(commands.len());
        let mut broken: Option<String> = None;
        for _ in commands {
            if let Some(ref reason) = broken {
                outcomes.push(Err(RedisError::Connection(reason.clone())));
                continue;
            }
            match conn.receive().await {
                Ok(value) => outcomes.push(into_reply(value)),
                // No reply read yet: treat like a failed flush.
                Err(e) if outcomes.is_empty() => return Err(Failure::Flush(e)),
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        received = outcomes.len(),
                        error = %e,
                        "connection failed while reading pipeline replies"
                    );
                    broken = Some(e.to_string());
                    outcomes.push(Err(e));
                }
            }
        }

        Ok(outcomes)
    }

    fn queue(&self) -> MutexGuard<'_, Vec<Command>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
