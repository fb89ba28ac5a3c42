use crate::adapters::push::{GatewayConnection, PushConnector};
use crate::domain::gateway::{Environment, Purpose};
use crate::error::{AppError, Result, TransportError};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, OwnedRwLockReadGuard, RwLock};
use tokio::time::Instant;

pub type PoolKey = (Environment, Purpose);

type Slot = Arc<OnceCell<Arc<ConnectionHandle>>>;
type ConnectionCell = Arc<RwLock<Option<Box<dyn GatewayConnection>>>>;

/// Acquisition bound used when a caller is not configured with its own.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
struct Metrics {
    opened: Counter<u64>,
    open_failures: Counter<u64>,
    closed: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("apns-relay");
        Self {
            opened: meter
                .u64_counter("gateway_connections_opened_total")
                .with_description("Total number of gateway connections opened")
                .build(),
            open_failures: meter
                .u64_counter("gateway_connection_failures_total")
                .with_description("Total number of failed gateway handshakes")
                .build(),
            closed: meter
                .u64_counter("gateway_connections_closed_total")
                .with_description("Total number of gateway connections closed by the pool")
                .build(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Opened but never leased.
    Created,
    /// At least one lease is outstanding.
    Active,
    /// Open with no outstanding lease. This says nothing about how long ago the handle was
    /// used: `ConnectionPool::reap_idle` decides staleness from `last_used`.
    Idle,
    Closed,
}

/// One authenticated gateway channel owned by the pool.
pub struct ConnectionHandle {
    id: u64,
    environment: Environment,
    purpose: Purpose,
    created_at: Instant,
    last_used: Mutex<Instant>,
    used: AtomicBool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    connection: ConnectionCell,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("environment", &self.environment)
            .field("purpose", &self.purpose)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    fn new(environment: Environment, purpose: Purpose, connection: Box<dyn GatewayConnection>) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            environment,
            purpose,
            created_at: now,
            last_used: Mutex::new(now),
            used: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            connection: Arc::new(RwLock::new(Some(connection))),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub const fn purpose(&self) -> Purpose {
        self.purpose
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        if self.is_closed() {
            HandleState::Closed
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            HandleState::Active
        } else if self.used.load(Ordering::Acquire) {
            HandleState::Idle
        } else {
            HandleState::Created
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    async fn lease(self: &Arc<Self>) -> Option<PooledConnection> {
        let guard = Arc::clone(&self.connection).read_owned().await;
        let guard = OwnedRwLockReadGuard::try_map(guard, |slot| slot.as_deref()).ok()?;

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.used.store(true, Ordering::Release);
        self.touch();

        Some(PooledConnection { handle: Arc::clone(self), guard })
    }

    /// Takes the connection out if it has been unused for longer than `max_idle` and no lease
    /// holds it. Never waits.
    fn try_close_idle(&self, max_idle: Duration, now: Instant) -> Option<Box<dyn GatewayConnection>> {
        if now.saturating_duration_since(self.last_used()) <= max_idle {
            return None;
        }
        let mut slot = self.connection.try_write().ok()?;
        self.closed.store(true, Ordering::Release);
        slot.take()
    }

    /// Closes the connection once every outstanding lease has been released.
    async fn close(&self) -> bool {
        let connection = {
            let mut slot = self.connection.write().await;
            self.closed.store(true, Ordering::Release);
            slot.take()
        };

        match connection {
            Some(connection) => {
                connection.close().await;
                true
            }
            None => false,
        }
    }
}

/// A lease on a pooled connection. While it is alive the pool will not close the handle.
pub struct PooledConnection {
    handle: Arc<ConnectionHandle>,
    guard: OwnedRwLockReadGuard<Option<Box<dyn GatewayConnection>>, dyn GatewayConnection>,
}

impl PooledConnection {
    #[must_use]
    pub const fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.handle.id
    }
}

impl Deref for PooledConnection {
    type Target = dyn GatewayConnection;

    fn deref(&self) -> &Self::Target {
        &*self.guard
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.handle.touch();
        self.handle.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("handle", &self.handle).finish()
    }
}

/// Keeps at most one live gateway connection per (environment, purpose).
///
/// The slot map lock is only held to look up, insert or remove entries. Handshakes run
/// outside it, serialized per key by the slot's `OnceCell`.
pub struct ConnectionPool {
    connector: Arc<dyn PushConnector>,
    slots: Mutex<HashMap<PoolKey, Slot>>,
    metrics: Metrics,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").field("connector", &self.connector).field("len", &self.len()).finish()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(connector: Arc<dyn PushConnector>) -> Self {
        Self { connector, slots: Mutex::new(HashMap::new()), metrics: Metrics::new() }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<PoolKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a lease on the live connection for the key, opening one if needed.
    ///
    /// # Errors
    /// Returns `AppError::TransportUnavailable` if the handshake fails or `timeout` elapses.
    /// A timed-out acquisition never leaves a handle registered.
    #[tracing::instrument(level = "debug", skip(self), fields(handle.id = tracing::field::Empty))]
    pub async fn acquire(
        &self,
        environment: Environment,
        purpose: Purpose,
        timeout: Duration,
    ) -> Result<PooledConnection> {
        let conn = if let Ok(res) = tokio::time::timeout(timeout, self.acquire_inner((environment, purpose))).await {
            res?
        } else {
            tracing::warn!(%environment, %purpose, timeout_ms = timeout.as_millis(), "Timed out acquiring gateway connection");
            return Err(AppError::TransportUnavailable(TransportError::TimedOut));
        };

        tracing::Span::current().record("handle.id", conn.id());
        Ok(conn)
    }

    async fn acquire_inner(&self, key: PoolKey) -> Result<PooledConnection> {
        loop {
            let slot = Arc::clone(self.slots().entry(key).or_default());
            let handle = Arc::clone(slot.get_or_try_init(|| self.open(key)).await?);

            if !self.is_current(key, &slot) {
                // Drained by shutdown or reap while the handshake was running.
                if handle.close().await {
                    self.metrics.closed.add(1, &[KeyValue::new("reason", "orphaned")]);
                }
                continue;
            }

            if let Some(conn) = handle.lease().await {
                return Ok(conn);
            }

            // Closed between lookup and lease; the next iteration opens a fresh handle.
            self.remove_slot(key, &slot);
        }
    }

    async fn open(&self, (environment, purpose): PoolKey) -> Result<Arc<ConnectionHandle>> {
        let connection = match self.connector.open(environment, purpose).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, %environment, %purpose, "Failed to open gateway connection");
                self.metrics.open_failures.add(1, &[KeyValue::new("purpose", purpose.to_string())]);
                return Err(AppError::TransportUnavailable(e));
            }
        };

        let handle = Arc::new(ConnectionHandle::new(environment, purpose, connection));
        tracing::info!(handle.id = handle.id, %environment, %purpose, "Opened gateway connection");
        self.metrics.opened.add(1, &[KeyValue::new("purpose", purpose.to_string())]);
        Ok(handle)
    }

    fn is_current(&self, key: PoolKey, slot: &Slot) -> bool {
        self.slots().get(&key).is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_slot(&self, key: PoolKey, slot: &Slot) {
        let mut slots = self.slots();
        if slots.get(&key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&key);
        }
    }

    /// Evicts a connection that failed at the transport level so the next `acquire` reconnects.
    /// The close itself waits for other leases in the background.
    pub fn discard(&self, conn: PooledConnection) {
        let handle = Arc::clone(conn.handle());
        drop(conn);

        {
            let mut slots = self.slots();
            let key = (handle.environment, handle.purpose);
            let is_ours = slots
                .get(&key)
                .and_then(|slot| slot.get())
                .is_some_and(|current| Arc::ptr_eq(current, &handle));
            if is_ours {
                slots.remove(&key);
            }
        }

        tracing::info!(handle.id = handle.id, "Discarding broken gateway connection");
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if handle.close().await {
                metrics.closed.add(1, &[KeyValue::new("reason", "discarded")]);
            }
        });
    }

    /// Closes and removes every handle idle for longer than `max_idle`. Leased handles are
    /// skipped. Returns the number of connections closed.
    #[tracing::instrument(level = "debug", skip(self), fields(reaped = tracing::field::Empty))]
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut reaped = Vec::new();

        self.slots().retain(|_, slot| match slot.get() {
            Some(handle) => {
                if let Some(connection) = handle.try_close_idle(max_idle, now) {
                    tracing::debug!(handle.id = handle.id, "Reaping idle gateway connection");
                    reaped.push(connection);
                    return false;
                }
                !handle.is_closed()
            }
            // Keep slots with a handshake in progress, drop abandoned ones.
            None => Arc::strong_count(slot) > 1,
        });

        for connection in &reaped {
            connection.close().await;
        }

        let count = reaped.len();
        if count > 0 {
            tracing::info!(count, "Closed idle gateway connections");
            self.metrics.closed.add(count as u64, &[KeyValue::new("reason", "idle")]);
        }
        tracing::Span::current().record("reaped", count);
        count
    }

    /// Closes every handle, waiting for outstanding leases. The pool stays usable: later
    /// acquisitions open fresh connections.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn shutdown_all(&self) -> usize {
        let drained: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        let handles: Vec<Arc<ConnectionHandle>> = drained.iter().filter_map(|slot| slot.get().cloned()).collect();

        let closed = futures::future::join_all(handles.iter().map(|handle| handle.close()))
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count();

        tracing::info!(count = closed, "Gateway connection pool shut down");
        self.metrics.closed.add(closed as u64, &[KeyValue::new("reason", "shutdown")]);
        closed
    }

    /// The registered handle for a key, if any.
    #[must_use]
    pub fn handle(&self, environment: Environment, purpose: Purpose) -> Option<Arc<ConnectionHandle>> {
        self.slots().get(&(environment, purpose)).and_then(|slot| slot.get().cloned())
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().values().filter(|slot| slot.initialized()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::{DeliveryResult, NotificationPayload};
    use crate::domain::registration::Invalidation;
    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream::BoxStream;

    #[derive(Debug, Default)]
    struct CountingConnector {
        opened: AtomicUsize,
    }

    #[derive(Debug)]
    struct NoopConnection;

    #[async_trait]
    impl GatewayConnection for NoopConnection {
        async fn deliver(&self, _payload: &NotificationPayload) -> std::result::Result<DeliveryResult, TransportError> {
            Ok(DeliveryResult::default())
        }

        fn feedback(&self) -> BoxStream<'_, std::result::Result<Invalidation, TransportError>> {
            futures::stream::empty().boxed()
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl PushConnector for CountingConnector {
        async fn open(
            &self,
            _environment: Environment,
            _purpose: Purpose,
        ) -> std::result::Result<Box<dyn GatewayConnection>, TransportError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NoopConnection))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_handle_state_transitions() {
        let pool = ConnectionPool::new(Arc::new(CountingConnector::default()));

        let conn = pool.acquire(Environment::Sandbox, Purpose::Push, TIMEOUT).await.unwrap();
        let handle = Arc::clone(conn.handle());
        assert_eq!(handle.state(), HandleState::Active);

        drop(conn);
        assert_eq!(handle.state(), HandleState::Idle);

        pool.shutdown_all().await;
        assert_eq!(handle.state(), HandleState::Closed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let connector = Arc::new(CountingConnector::default());
        let pool = ConnectionPool::new(Arc::clone(&connector) as Arc<dyn PushConnector>);

        let push = pool.acquire(Environment::Sandbox, Purpose::Push, TIMEOUT).await.unwrap();
        let feedback = pool.acquire(Environment::Sandbox, Purpose::Feedback, TIMEOUT).await.unwrap();
        let prod = pool.acquire(Environment::Production, Purpose::Push, TIMEOUT).await.unwrap();

        assert_ne!(push.id(), feedback.id());
        assert_ne!(push.id(), prod.id());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_discard_evicts_handle() {
        let connector = Arc::new(CountingConnector::default());
        let pool = ConnectionPool::new(Arc::clone(&connector) as Arc<dyn PushConnector>);

        let conn = pool.acquire(Environment::Sandbox, Purpose::Push, TIMEOUT).await.unwrap();
        let first_id = conn.id();
        pool.discard(conn);
        assert!(pool.handle(Environment::Sandbox, Purpose::Push).is_none());

        let conn = pool.acquire(Environment::Sandbox, Purpose::Push, TIMEOUT).await.unwrap();
        assert_ne!(conn.id(), first_id);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }
}
