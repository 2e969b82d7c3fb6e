//! Bounded connection pool
//!
//! The pool owns the idle connections and a count of every connection it
//! has handed out or is keeping idle. Both live behind one mutex, which is
//! only ever held for bookkeeping and never across an `.await`.
//!
//! Callers that find the pool at its active cap wait on a [`Notify`] that is
//! signalled whenever a connection is returned or discarded, bounded by the
//! caller's deadline. Dropping the `acquire` future cancels the wait.
//!
//! Borrowed connections are handed out as [`PooledConnection`], which goes
//! back to the pool when dropped. A connection that saw a transport error is
//! closed instead of being idled.

use crate::connection::{Connection, ConnectionFactory};
use redis_keeper_core::{
    config::PoolSettings,
    error::{RedisError, RedisResult},
    types::Command,
    value::RespValue,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn, Span};

struct IdleConnection {
    conn: Box<dyn Connection>,
    created_at: Instant,
    idle_since: Instant,
}

struct PoolState {
    /// Most recently returned first
    idle: VecDeque<IdleConnection>,
    /// Checked out + idle
    active: usize,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    exhausted: AtomicU64,
}

struct PoolInner {
    settings: PoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    released: Notify,
    counters: Counters,
    span: Span,
}

enum Checkout {
    Idle(IdleConnection),
    Reserved,
    Full,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections checked out or idle
    pub active: usize,
    /// Connections waiting in the idle set
    pub idle: usize,
    /// Connections opened since the pool was created
    pub created: u64,
    /// Acquisitions served from the idle set
    pub reused: u64,
    /// Connections closed by the pool
    pub discarded: u64,
    /// Acquisitions that ran out of wait budget
    pub exhausted: u64,
}

impl PoolStats {
    /// Connections currently borrowed
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.active.saturating_sub(self.idle)
    }
}

/// Connection pool handle. Cloning shares the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool. No connection is opened until the first acquisition.
    pub fn new(settings: PoolSettings, factory: Arc<dyn ConnectionFactory>, span: Span) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(settings.max_idle.min(64)),
            active: 0,
            closed: false,
        };
        Self {
            inner: Arc::new(PoolInner {
                settings,
                factory,
                state: Mutex::new(state),
                released: Notify::new(),
                counters: Counters::default(),
                span,
            }),
        }
    }

    /// Settings the pool was built with
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Acquire a connection, waiting at most `max_wait` when the pool is at
    /// its active cap.
    ///
    /// # Errors
    ///
    /// [`RedisError::PoolExhausted`] when the wait budget elapses,
    /// [`RedisError::PoolClosed`] after [`Pool::close`], or the error of
    /// opening a new connection.
    pub async fn acquire(&self, max_wait: Duration) -> RedisResult<PooledConnection> {
        self.acquire_until(Instant::now() + max_wait).await
    }

    /// Acquire a connection, waiting until `deadline` at the latest.
    ///
    /// An idle connection is preferred. One that has been idle for at least
    /// the configured ping period is probed first; if the probe fails it is
    /// discarded and the acquisition carries on against the same deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::acquire`].
    pub async fn acquire_until(&self, deadline: Instant) -> RedisResult<PooledConnection> {
        let budget = deadline.saturating_duration_since(Instant::now());

        loop {
            // Register interest before looking at the state so a release
            // between the check and the wait is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.checkout()? {
                Checkout::Idle(entry) => {
                    let idle_for = entry.idle_since.elapsed();
                    let mut conn =
                        PooledConnection::new(self.inner.clone(), entry.conn, entry.created_at);

                    if idle_for >= self.inner.settings.idle_ping_period {
                        if let Err(e) = conn.ping().await {
                            warn!(
                                parent: &self.inner.span,
                                error = %e,
                                idle_ms = idle_for.as_millis() as u64,
                                "idle connection failed liveness probe, discarding"
                            );
                            conn.invalidate();
                            continue;
                        }
                    }

                    self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                }
                Checkout::Reserved => {
                    let slot = SlotGuard::new(&self.inner);
                    let conn = self.inner.factory.connect().await?;
                    slot.disarm();

                    self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        parent: &self.inner.span,
                        endpoint = %self.inner.factory.endpoint(),
                        "opened new connection"
                    );
                    return Ok(PooledConnection::new(
                        self.inner.clone(),
                        conn,
                        Instant::now(),
                    ));
                }
                Checkout::Full => {
                    if timeout_at(deadline, notified).await.is_err() {
                        self.inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            parent: &self.inner.span,
                            waited_ms = budget.as_millis() as u64,
                            "connection pool exhausted"
                        );
                        return Err(RedisError::PoolExhausted(budget));
                    }
                }
            }
        }
    }

    /// Return a borrowed connection, closing it instead when `invalidate`
    /// is set. Dropping a [`PooledConnection`] is equivalent to
    /// `release(conn, false)` unless it was invalidated earlier.
    pub fn release(&self, mut conn: PooledConnection, invalidate: bool) {
        if invalidate {
            conn.invalidate();
        }
        drop(conn);
    }

    /// Snapshot of the pool counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (active, idle) = {
            let state = self.inner.lock();
            (state.active, state.idle.len())
        };
        let counters = &self.inner.counters;
        PoolStats {
            active,
            idle,
            created: counters.created.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            exhausted: counters.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Whether [`Pool::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Close every idle connection and refuse further acquisitions.
    ///
    /// Connections that are checked out stay usable by their borrowers and
    /// are closed when they come back. Waiters are woken and fail with
    /// [`RedisError::PoolClosed`]. Calling this again has no effect.
    pub fn close(&self) {
        let drained: Vec<IdleConnection> = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.active = state.active.saturating_sub(drained.len());
            drained
        };

        let count = drained.len();
        for mut entry in drained {
            entry.conn.close();
        }
        self.inner
            .counters
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);
        info!(parent: &self.inner.span, closed_idle = count, "connection pool closed");
        self.inner.released.notify_waiters();
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> RedisResult<Checkout> {
        let mut expired = Vec::new();
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Err(RedisError::PoolClosed);
            }

            if let Some(limit) = self.settings.idle_timeout {
                // Oldest entries sit at the back.
                while state
                    .idle
                    .back()
                    .is_some_and(|entry| entry.idle_since.elapsed() > limit)
                {
                    if let Some(stale) = state.idle.pop_back() {
                        state.active = state.active.saturating_sub(1);
                        expired.push(stale);
                    }
                }
            }

            if let Some(entry) = state.idle.pop_front() {
                Checkout::Idle(entry)
            } else if self
                .settings
                .max_active
                .map_or(true, |max| state.active < max)
            {
                state.active += 1;
                Checkout::Reserved
            } else {
                Checkout::Full
            }
        };

        if !expired.is_empty() {
            debug!(parent: &self.span, count = expired.len(), "closing idle-timed-out connections");
            self.counters
                .discarded
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            for mut entry in expired {
                entry.conn.close();
            }
            self.released.notify_waiters();
        }

        Ok(outcome)
    }

    fn release(&self, conn: Box<dyn Connection>, created_at: Instant, broken: bool) {
        let rejected = {
            let mut state = self.lock();
            let keep = !broken
                && !state.closed
                && conn.is_open()
                && state.idle.len() < self.settings.max_idle;
            if keep {
                state.idle.push_front(IdleConnection {
                    conn,
                    created_at,
                    idle_since: Instant::now(),
                });
                None
            } else {
                state.active = state.active.saturating_sub(1);
                Some(conn)
            }
        };

        if let Some(mut conn) = rejected {
            conn.close();
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            if broken {
                warn!(parent: &self.span, "discarded broken connection");
            } else {
                debug!(parent: &self.span, "closed surplus connection");
            }
        }
        self.released.notify_waiters();
    }

    fn release_slot(&self) {
        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.released.notify_waiters();
    }
}

/// Holds a reserved active slot until a connection is opened for it.
/// Dropped armed (connect failed, or the acquiring future was cancelled),
/// it gives the slot back.
struct SlotGuard<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(pool: &'a PoolInner) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// A connection borrowed from the pool.
///
/// Every transport error seen through this handle invalidates it; a
/// `RespValue::Error` reply does not. The connection is returned (or closed)
/// when the handle is dropped. A handle dropped while replies are still
/// owed, such as a cancelled request, closes the connection so the stray
/// replies never reach the next borrower.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    invalid: bool,
    // Commands queued or written whose reply has not been read yet.
    pending: usize,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Box<dyn Connection>, created_at: Instant) -> Self {
        Self {
            pool,
            conn: Some(conn),
            created_at,
            invalid: false,
            pending: 0,
        }
    }

    /// Close this connection on release instead of returning it to the idle set
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Whether the connection will be closed on release
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalid || self.pending > 0
    }

    /// Replies owed by the store for commands sent on this handle
    #[must_use]
    pub const fn pending_replies(&self) -> usize {
        self.pending
    }

    /// When the underlying connection was opened
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Queue a command without I/O
    pub async fn send(&mut self, command: &Command) -> RedisResult<()> {
        self.pending += 1;
        let result = self.conn()?.send(command).await;
        self.track(result)
    }

    /// Write queued commands
    pub async fn flush(&mut self) -> RedisResult<()> {
        let result = self.conn()?.flush().await;
        self.track(result)
    }

    /// Read one reply
    pub async fn receive(&mut self) -> RedisResult<RespValue> {
        let result = self.conn()?.receive().await;
        if result.is_ok() {
            self.pending = self.pending.saturating_sub(1);
        }
        self.track(result)
    }

    /// Send one command and read its reply
    pub async fn request(&mut self, command: &Command) -> RedisResult<RespValue> {
        self.pending += 1;
        let result = self.conn()?.request(command).await;
        if result.is_ok() {
            self.pending -= 1;
        }
        self.track(result)
    }

    /// Liveness probe
    pub async fn ping(&mut self) -> RedisResult<()> {
        self.pending += 1;
        let result = self.conn()?.ping().await;
        // Any answer, even an unexpected one, has been read off the wire.
        if !matches!(result, Err(ref e) if e.is_transport()) {
            self.pending -= 1;
        }
        self.track(result)
    }

    fn conn(&mut self) -> RedisResult<&mut (dyn Connection + 'static)> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| RedisError::Connection("connection already released".to_string()))
    }

    fn track<T>(&mut self, result: RedisResult<T>) -> RedisResult<T> {
        if matches!(result, Err(ref e) if e.is_transport()) {
            self.invalid = true;
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let broken = self.invalid || self.pending > 0;
            self.pool.release(conn, self.created_at, broken);
        }
    }
}
