//! Shared database connection with single-flight connect and automatic reconnect.
//!
//! A [`ConnectionManager`] owns at most one live connection. Concurrent callers of
//! [`ConnectionManager::connect`] share one in-flight attempt. Failed attempts and
//! detected disconnects schedule a background reconnect that keeps retrying until
//! the database comes back.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::DbError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Establishes and health-checks connections for a [`ConnectionManager`].
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, DbError>> + Send;

    fn ping(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<(), DbError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts failed in a row.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { initial, max } => {
                let exponent = failed_attempts.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub reconnect: ReconnectPolicy,
    /// Zero disables the liveness monitor.
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub connection_error: Option<String>,
    pub reconnect_pending: bool,
    pub failed_attempts: u32,
    pub total_attempts: u64,
}

type Attempt<T> = Shared<BoxFuture<'static, Result<T, DbError>>>;

struct ConnectionState<T> {
    connection: Option<T>,
    in_flight: Option<Attempt<T>>,
    last_error: Option<DbError>,
    reconnect: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    failed_attempts: u32,
    total_attempts: u64,
}

impl<T> Default for ConnectionState<T> {
    fn default() -> Self {
        Self {
            connection: None,
            in_flight: None,
            last_error: None,
            reconnect: None,
            monitor: None,
            failed_attempts: 0,
            total_attempts: 0,
        }
    }
}

struct Inner<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    state: Mutex<ConnectionState<C::Connection>>,
}

pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager in the disconnected state. Nothing is dialed until
    /// the first call to [`connect`](Self::connect).
    pub fn new(connector: C, settings: ConnectionSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                settings,
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Returns the live connection, joins the attempt already in flight, or
    /// starts a new attempt.
    pub async fn connect(&self) -> Result<C::Connection, DbError> {
        let attempt = {
            let mut state = self.inner.lock_state();
            if let Some(connection) = &state.connection {
                return Ok(connection.clone());
            }
            match state.in_flight.clone() {
                Some(attempt) => attempt,
                None => Inner::start_attempt(&self.inner, &mut state),
            }
        };
        attempt.await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connection.is_some()
    }

    pub fn connection(&self) -> Option<C::Connection> {
        self.inner.lock_state().connection.clone()
    }

    /// Guard for handlers that need the database.
    pub async fn ensure_connected(&self) -> Result<C::Connection, DbError> {
        match self.connection() {
            Some(connection) => Ok(connection),
            None => self.connect().await,
        }
    }

    /// Polls until connected or `timeout` elapses. Never starts an attempt.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Driver reported the connection as lost.
    pub fn handle_disconnect(&self) {
        self.inner.handle_disconnect();
    }

    /// Driver reported an error on an otherwise live connection.
    pub fn record_error(&self, error: DbError) {
        self.inner.record_error(error);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.inner.lock_state();
        ConnectionSnapshot {
            is_connected: state.connection.is_some(),
            is_connecting: state.in_flight.is_some(),
            connection_error: state.last_error.as_ref().map(ToString::to_string),
            reconnect_pending: state.reconnect.is_some(),
            failed_attempts: state.failed_attempts,
            total_attempts: state.total_attempts,
        }
    }
}

impl<C: Connector> Inner<C> {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_attempt(
        this: &Arc<Self>,
        state: &mut ConnectionState<C::Connection>,
    ) -> Attempt<C::Connection> {
        state.last_error = None;
        if let Some(timer) = state.reconnect.take() {
            timer.abort();
        }
        state.total_attempts += 1;
        log::info!("Connecting to database (attempt {})", state.total_attempts);

        // The attempt runs on its own task so it completes even if every caller gives up.
        let task_inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(task_inner.connector.connect())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    log::error!("Database connector panicked during connect");
                    Err(DbError::Aborted)
                });
            Inner::finish_attempt(&task_inner, &result);
            result
        });

        let waiter_inner = Arc::clone(this);
        let attempt = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    // Only reached when the runtime cancels the attempt task.
                    log::error!("Database connection attempt did not complete: {}", err);
                    let result = Err(DbError::Aborted);
                    Inner::finish_attempt(&waiter_inner, &result);
                    result
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(attempt.clone());
        attempt
    }

    fn finish_attempt(this: &Arc<Self>, result: &Result<C::Connection, DbError>) {
        let mut state = this.lock_state();
        state.in_flight = None;

        match result {
            Ok(connection) => {
                state.connection = Some(connection.clone());
                state.failed_attempts = 0;
                if let Some(timer) = state.reconnect.take() {
                    timer.abort();
                }
                if let Some(monitor) = state.monitor.take() {
                    monitor.abort();
                }
                state.monitor = Inner::spawn_monitor(this, connection.clone());
                log::info!("Database connected");
            }
            Err(err) => {
                state.failed_attempts = state.failed_attempts.saturating_add(1);
                state.last_error = Some(err.clone());
                log::error!(
                    "Database connection failed ({} in a row): {}",
                    state.failed_attempts,
                    err
                );
                Inner::schedule_reconnect(this, &mut state);
            }
        }
    }

    fn handle_disconnect(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.connection.take().is_some() {
            log::warn!("Database disconnected");
        }
        if let Some(monitor) = state.monitor.take() {
            monitor.abort();
        }
        if state.in_flight.is_some() {
            return;
        }
        Inner::schedule_reconnect(self, &mut state);
    }

    fn record_error(&self, error: DbError) {
        log::error!("Database error: {}", error);
        self.lock_state().last_error = Some(error);
    }

    fn schedule_reconnect(this: &Arc<Self>, state: &mut ConnectionState<C::Connection>) {
        if state.reconnect.is_some() {
            log::debug!("Database reconnect already scheduled");
            return;
        }

        let delay = this.settings.reconnect.delay(state.failed_attempts);
        log::info!("Reconnecting to database in {:?}", delay);

        let weak = Arc::downgrade(this);
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.lock_state().reconnect = None;

            let manager = ConnectionManager { inner };
            if let Err(err) = manager.connect().await {
                log::warn!("Scheduled database reconnect failed: {}", err);
            }
        }));
    }

    fn spawn_monitor(this: &Arc<Self>, connection: C::Connection) -> Option<JoinHandle<()>> {
        let interval = this.settings.heartbeat_interval;
        if interval.is_zero() {
            return None;
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = inner.connector.ping(&connection).await {
                    inner.record_error(err);
                    inner.handle_disconnect();
                    break;
                }
            }
        }))
    }
}

impl<C: Connector> Drop for Inner<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.reconnect.take() {
            timer.abort();
        }
        if let Some(monitor) = state.monitor.take() {
            monitor.abort();
        }
    }
}
