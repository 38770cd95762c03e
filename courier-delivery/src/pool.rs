//! Fixed-size pool of relay connections.
//!
//! Every connection is, at every instant, either resident in the pool or
//! checked out to exactly one caller. Waiting callers are served in FIFO
//! order. No lock is held across network I/O.

use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use courier_common::{config::RelayConfig, internal, tracing};
use courier_metrics::{DeliveryMetrics, ReconnectTrigger};
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    Connection, PoolError,
    relay::{Relay, SmtpRelay},
};

/// Snapshot of where the pool's connections are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    /// Resident and available for checkout.
    pub idle: usize,
    pub checked_out: usize,
    /// Returned after shutdown; closed and never handed out again.
    pub parked: usize,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct Slots {
    idle: VecDeque<Connection>,
    parked: Vec<Connection>,
    checked_out: usize,
    closed: bool,
}

#[derive(Debug)]
struct PoolInner {
    size: usize,
    slots: Mutex<Slots>,
    /// One permit per idle connection.
    available: Semaphore,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl PoolInner {
    /// Put a connection back. Synchronous so it can run from `Drop`.
    fn check_in(&self, connection: Connection) {
        let mut slots = self.slots.lock();
        slots.checked_out -= 1;

        if slots.closed {
            slots.parked.push(connection);
        } else {
            slots.idle.push_back(connection);
            self.available.add_permits(1);
        }
        drop(slots);

        self.record_checkin();
    }

    /// Make a connection idle again, unless the pool has shut down. A
    /// connection handed back here is still counted as checked out.
    fn check_in_open(&self, connection: Connection) -> Result<(), Connection> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(connection);
        }

        slots.checked_out -= 1;
        slots.idle.push_back(connection);
        self.available.add_permits(1);
        drop(slots);

        self.record_checkin();
        Ok(())
    }

    fn record_checkin(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_checkin();
        }
    }
}

/// Handle to a shared pool of relay connections. Cloning is cheap and every
/// clone refers to the same pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Start building a pool for `config`.
    #[must_use]
    pub fn builder(config: RelayConfig) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder::new(config)
    }

    /// Build a pool of `size` connections against the SMTP relay in `config`.
    ///
    /// # Errors
    ///
    /// If `size` is zero.
    pub async fn initialize(config: RelayConfig, size: usize) -> Result<Self, PoolError> {
        Self::builder(config).size(size).build().await
    }

    /// Take a connection out of the pool, waiting until one is free.
    ///
    /// Cancelling the returned future while it waits takes nothing from the
    /// pool.
    ///
    /// # Errors
    ///
    /// `Closed` once the pool has been shut down.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let permit = self
            .inner
            .available
            .acquire()
            .await
            .map_err(|_| PoolError::Closed)?;
        permit.forget();

        let connection = {
            let mut slots = self.inner.slots.lock();
            let connection = slots.idle.pop_front().ok_or(PoolError::Closed)?;
            slots.checked_out += 1;
            connection
        };

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_checkout();
        }
        tracing::trace!(connection = connection.id(), "Checked out connection");

        Ok(PooledConnection {
            connection: Some(connection),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Return a connection, repairing it first.
    ///
    /// A connection that fails its liveness probe gets exactly one reconnect
    /// attempt; it is returned whether or not that attempt works.
    ///
    /// If the pool shuts down meanwhile, the connection is closed and parked
    /// instead.
    pub async fn release(&self, mut conn: PooledConnection) {
        if !conn.pool_closed() {
            self.repair(&mut conn).await;
        }

        if !conn.check_in_open() {
            conn.close().await;
            conn.check_in();
        }
    }

    async fn repair(&self, conn: &mut Connection) {
        if let Err(error) = conn.validate().await {
            tracing::warn!(
                connection = conn.id(),
                "Connection failed validation on release, reconnecting: {error}"
            );

            let reconnected = conn.reconnect().await;
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_reconnect(ReconnectTrigger::Release, reconnected.is_ok());
            }
            if let Err(error) = reconnected {
                tracing::error!(
                    connection = conn.id(),
                    "Reconnect failed, returning connection disconnected: {error}"
                );
            }
        }
    }

    /// Shut the pool down: refuse new checkouts and close every resident
    /// connection. Connections still checked out are closed as they come
    /// back. Safe to call any number of times.
    ///
    /// Resident connections are parked at once; only their detached sessions
    /// are closed afterwards.
    pub async fn quit(&self) {
        let mut sessions = Vec::new();
        {
            let mut slots = self.inner.slots.lock();
            if !slots.closed {
                internal!(level = INFO, "Shutting down connection pool");
            }
            slots.closed = true;
            self.inner.available.close();

            while let Some(mut connection) = slots.idle.pop_front() {
                if let Some(session) = connection.take_session() {
                    sessions.push((connection.id(), session));
                }
                slots.parked.push(connection);
            }
        }

        for (id, mut session) in sessions {
            session.quit().await;
            internal!(level = DEBUG, "Connection {id} closed");
        }
    }

    /// Alias of [`ConnectionPool::quit`].
    pub async fn shutdown(&self) {
        self.quit().await;
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let slots = self.inner.slots.lock();
        PoolStatus {
            size: self.inner.size,
            idle: slots.idle.len(),
            checked_out: slots.checked_out,
            parked: slots.parked.len(),
            closed: slots.closed,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<DeliveryMetrics>> {
        self.inner.metrics.as_ref()
    }
}

/// Builder for [`ConnectionPool`].
pub struct ConnectionPoolBuilder {
    config: RelayConfig,
    size: usize,
    relay: Option<Arc<dyn Relay>>,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl ConnectionPoolBuilder {
    fn new(config: RelayConfig) -> Self {
        Self {
            config,
            size: courier_common::config::PoolConfig::default().size,
            relay: None,
            metrics: None,
        }
    }

    /// Number of connections. Default: 5
    #[must_use]
    pub const fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Relay implementation to open sessions with. Default: [`SmtpRelay`]
    #[must_use]
    pub fn relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create every connection and try to connect them all concurrently.
    ///
    /// Connections that fail to connect are kept, disconnected; they heal on
    /// first use or on release.
    ///
    /// # Errors
    ///
    /// If the configured size is zero.
    pub async fn build(self) -> Result<ConnectionPool, PoolError> {
        if self.size == 0 {
            return Err(PoolError::Empty);
        }

        let config = Arc::new(self.config);
        let relay: Arc<dyn Relay> = match self.relay {
            Some(relay) => relay,
            None => Arc::new(SmtpRelay::new()),
        };
        let metrics = self.metrics;

        let new_connection = |id| {
            Connection::new(
                id,
                Arc::clone(&config),
                Arc::clone(&relay),
                metrics.clone(),
            )
        };

        let mut startup = JoinSet::new();
        for id in 0..self.size {
            let mut connection = new_connection(id);
            startup.spawn(async move {
                let result = connection.connect().await;
                (connection, result)
            });
        }

        let mut connections = Vec::with_capacity(self.size);
        let mut connected = 0;
        while let Some(joined) = startup.join_next().await {
            match joined {
                Ok((connection, result)) => {
                    if let Some(metrics) = &metrics {
                        metrics.record_reconnect(ReconnectTrigger::Startup, result.is_ok());
                    }
                    match result {
                        Ok(()) => connected += 1,
                        Err(error) => tracing::warn!(
                            connection = connection.id(),
                            relay = %config.address(),
                            "Initial connection failed, will retry on use: {error}"
                        ),
                    }
                    connections.push(connection);
                }
                Err(error) => tracing::error!("Connection startup task failed: {error}"),
            }
        }

        // A startup task that died took its connection with it
        for id in 0..self.size {
            if !connections.iter().any(|c| c.id() == id) {
                connections.push(new_connection(id));
            }
        }
        connections.sort_by_key(Connection::id);

        internal!(
            level = INFO,
            "Connection pool ready: {connected}/{} connected to {}",
            self.size,
            config.address()
        );

        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                size: self.size,
                slots: Mutex::new(Slots {
                    idle: connections.into(),
                    ..Slots::default()
                }),
                available: Semaphore::new(self.size),
                metrics,
            }),
        })
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release`]. If it is dropped instead
/// (the holder was cancelled or panicked) the connection still goes back,
/// with its session discarded since its state is unknown.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn pool_closed(&self) -> bool {
        self.pool.slots.lock().closed
    }

    fn check_in(mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.check_in(connection);
        }
    }

    /// Returns `false`, keeping the connection, if the pool has shut down.
    fn check_in_open(&mut self) -> bool {
        let Some(connection) = self.connection.take() else {
            return true;
        };

        match self.pool.check_in_open(connection) {
            Ok(()) => true,
            Err(connection) => {
                self.connection = Some(connection);
                false
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection")
            .field(&self.connection)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
            .as_ref()
            .expect("connection is present until checked in")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("connection is present until checked in")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            tracing::debug!(
                connection = connection.id(),
                "Connection dropped without release, discarding its session"
            );
            connection.discard_session();
            self.pool.check_in(connection);
        }
    }
}
