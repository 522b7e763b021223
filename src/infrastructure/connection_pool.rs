//! Connection Pool
//!
//! Pooled SQLite connections shared by every request handler.
//! The handle is created once at boot and closed once at shutdown.

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Connection pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Maximum idle connections kept for reuse
    pub max_idle: usize,
    /// Maximum open connections (0 = unlimited)
    pub max_open: usize,
    /// Maximum connection lifetime (zero = unlimited)
    pub max_lifetime: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_idle: 10,
            max_open: 100,
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

impl PoolLimits {
    /// Idle capacity never exceeds the open cap.
    fn effective_max_idle(&self) -> usize {
        if self.max_open > 0 {
            self.max_idle.min(self.max_open)
        } else {
            self.max_idle
        }
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        !self.max_lifetime.is_zero() && created_at.elapsed() > self.max_lifetime
    }
}

/// Something whose pool limits can be (re)configured after it was dialed.
pub trait PoolTuning {
    fn apply_limits(&self, limits: PoolLimits);
}

/// Pool errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// Opening or verifying a connection failed
    #[error("connection error: {0}")]
    Connect(String),
    /// All permitted connections are in use
    #[error("connection pool exhausted ({max_open} open)")]
    PoolExhausted { max_open: usize },
    /// The pool was closed during shutdown
    #[error("connection pool is closed")]
    Closed,
    /// The caller's deadline passed first
    #[error("database call exceeded its deadline")]
    Timeout,
    /// A statement failed
    #[error("query failed: {0}")]
    Query(String),
    /// The blocking worker died
    #[error("blocking task failed: {0}")]
    Task(String),
}

struct PooledConnection {
    conn: Connection,
    created_at: Instant,
}

impl PooledConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            created_at: Instant::now(),
        }
    }
}

struct PoolInner {
    path: PathBuf,
    limits: RwLock<PoolLimits>,
    idle: Mutex<VecDeque<PooledConnection>>,
    /// Idle + checked-out connections
    open: AtomicUsize,
    closed: AtomicBool,
    /// Signalled whenever a slot may have become available
    released: Notify,
}

impl PoolInner {
    fn release(&self, conn: PooledConnection) {
        let limits = *self.limits.read();
        if self.closed.load(Ordering::SeqCst) || limits.is_expired(conn.created_at) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        } else {
            let mut idle = self.idle.lock();
            if idle.len() < limits.effective_max_idle() {
                idle.push_back(conn);
            } else {
                drop(idle);
                self.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.released.notify_waiters();
    }

    /// Reserve a slot for a new connection under the open cap.
    fn reserve_slot(&self, max_open: usize) -> Result<(), PoolError> {
        let mut current = self.open.load(Ordering::SeqCst);
        loop {
            if max_open > 0 && current >= max_open {
                return Err(PoolError::PoolExhausted { max_open });
            }
            match self.open.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Shared handle to the pooled database.
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("path", &self.inner.path)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionHandle {
    /// Dial the database on the blocking pool.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PoolError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(path))
            .await
            .map_err(|e| PoolError::Task(e.to_string()))?
    }

    /// Open the database, verify it answers, and keep that first
    /// connection idle in the pool.
    pub fn open_blocking(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::dial(&path)?;

        let handle = Self {
            inner: Arc::new(PoolInner {
                path,
                limits: RwLock::new(PoolLimits::default()),
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(1),
                closed: AtomicBool::new(false),
                released: Notify::new(),
            }),
        };
        handle
            .inner
            .idle
            .lock()
            .push_back(PooledConnection::new(conn));
        Ok(handle)
    }

    fn dial(path: &Path) -> Result<Connection, PoolError> {
        let conn = Connection::open(path).map_err(|e| PoolError::Connect(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        Ok(conn)
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current pool limits.
    pub fn limits(&self) -> PoolLimits {
        *self.inner.limits.read()
    }

    /// Check out a connection (blocking).
    ///
    /// Reuses an idle connection when one is still within its lifetime,
    /// otherwise opens a new one if the open cap allows it. Fails with
    /// [`PoolError::PoolExhausted`] at the cap; [`checkout`](Self::checkout)
    /// waits instead.
    pub fn acquire(&self) -> Result<PooledGuard, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let limits = self.limits();
        loop {
            let next = self.inner.idle.lock().pop_front();
            match next {
                Some(conn) if limits.is_expired(conn.created_at) => {
                    tracing::debug!(path = ?self.inner.path, "discarding expired connection");
                    self.inner.open.fetch_sub(1, Ordering::SeqCst);
                }
                Some(conn) => return Ok(self.guard(conn)),
                None => break,
            }
        }

        self.inner.reserve_slot(limits.max_open)?;
        match Self::dial(&self.inner.path) {
            Ok(conn) => Ok(self.guard(PooledConnection::new(conn))),
            Err(e) => {
                self.inner.open.fetch_sub(1, Ordering::SeqCst);
                self.inner.released.notify_waiters();
                Err(e)
            }
        }
    }

    /// Check out a connection, waiting for a release while the pool is at
    /// its open cap. Callers bound the wait with their own deadline.
    pub async fn checkout(&self) -> Result<PooledGuard, PoolError> {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let handle = self.clone();
            let attempt = tokio::task::spawn_blocking(move || handle.acquire())
                .await
                .map_err(|e| PoolError::Task(e.to_string()))?;
            match attempt {
                Err(PoolError::PoolExhausted { max_open }) => {
                    tracing::debug!(max_open, "connection pool at capacity, waiting for a release");
                    released.await;
                }
                other => return other,
            }
        }
    }

    fn guard(&self, conn: PooledConnection) -> PooledGuard {
        PooledGuard {
            conn: Some(conn),
            pool: self.inner.clone(),
        }
    }

    /// Run `f` against a pooled connection on the blocking pool.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.checkout().await?;
        tokio::task::spawn_blocking(move || {
            f(guard.connection()).map_err(|e| PoolError::Query(e.to_string()))
        })
        .await
        .map_err(|e| PoolError::Task(e.to_string()))?
    }

    /// Liveness probe, abandoned once `deadline` passes.
    ///
    /// Reads the schema table rather than `SELECT 1`, so a database another
    /// writer holds locked does not answer. Waiting for a free connection
    /// counts against the same deadline.
    pub async fn ping(&self, deadline: tokio::time::Instant) -> Result<(), PoolError> {
        let probe = self.with_connection(|conn| {
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
        });
        match tokio::time::timeout_at(deadline, probe).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(PoolError::Timeout),
        }
    }

    /// Close the pool. Returns `false` if it was already closed.
    ///
    /// Idle connections are dropped now; checked-out ones are dropped when
    /// their guard is released.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let drained: Vec<PooledConnection> = self.inner.idle.lock().drain(..).collect();
        self.inner.open.fetch_sub(drained.len(), Ordering::SeqCst);
        self.inner.released.notify_waiters();
        tracing::info!(
            path = ?self.inner.path,
            closed_idle = drained.len(),
            "database connection pool closed"
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Pool statistics.
    pub fn stats(&self) -> PoolStats {
        let limits = self.limits();
        PoolStats {
            open: self.inner.open.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().len(),
            max_open: limits.max_open,
            max_idle: limits.max_idle,
            closed: self.is_closed(),
        }
    }
}

impl PoolTuning for ConnectionHandle {
    fn apply_limits(&self, limits: PoolLimits) {
        *self.inner.limits.write() = limits;

        let mut idle = self.inner.idle.lock();
        let keep = limits.effective_max_idle();
        let mut trimmed = 0;
        while idle.len() > keep {
            idle.pop_back();
            trimmed += 1;
        }
        drop(idle);
        self.inner.open.fetch_sub(trimmed, Ordering::SeqCst);
        self.inner.released.notify_waiters();

        tracing::debug!(
            max_idle = limits.max_idle,
            max_open = limits.max_open,
            max_lifetime = ?limits.max_lifetime,
            trimmed,
            "pool limits applied"
        );
    }
}

/// A checked-out connection, returned to the pool on drop.
pub struct PooledGuard {
    conn: Option<PooledConnection>,
    pool: Arc<PoolInner>,
}

impl PooledGuard {
    pub fn connection(&self) -> &Connection {
        match &self.conn {
            Some(pooled) => &pooled.conn,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl Drop for PooledGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle + checked-out connections
    pub open: usize,
    /// Connections waiting for reuse
    pub idle: usize,
    pub max_open: usize,
    pub max_idle: usize,
    pub closed: bool,
}
