//! Physical connection sources.
//!
//! # Responsibility
//! - Hand out ready-to-use SQLite connections wrapped in [`ConnectionHandle`].
//! - Take connections back and keep acquire/release counters.
//!
//! # Invariants
//! - Handle ids are unique for the lifetime of the process.
//! - A released handle never goes back to the pool with an open transaction.
//!
//! # See also
//! - `tx::manager` for transaction-owned connections.

use super::schema::bootstrap_schema;
use super::{DbError, DbResult};
use crate::config::{DataSourceConfig, DbLocation};
use crate::translate::{connection_failure, DataResult, ErrorTranslator};
use log::{debug, info, warn};
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Connection shared between the transaction registry and the context that
/// owns the transaction. Only that context ever locks it.
pub type BoundConnection = Arc<Mutex<ConnectionHandle>>;

enum HandleInner {
    Pooled(PooledConnection<SqliteConnectionManager>),
    Direct(Connection),
}

/// Owned handle to one physical connection.
pub struct ConnectionHandle {
    id: u64,
    inner: HandleInner,
}

impl ConnectionHandle {
    fn new(inner: HandleInner) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            inner,
        }
    }

    /// Process-unique id, used in logs and tests.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Deref for ConnectionHandle {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match &self.inner {
            HandleInner::Pooled(conn) => &**conn,
            HandleInner::Direct(conn) => conn,
        }
    }
}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            HandleInner::Pooled(_) => "pooled",
            HandleInner::Direct(_) => "direct",
        };
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

/// Acquire/release counters of one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub acquired: u64,
    pub released: u64,
}

impl SourceStats {
    /// Handles currently checked out.
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Supplier of physical connections. Shared by every execution context.
pub trait ConnectionSource: Send + Sync {
    /// Returns a connection ready for immediate use.
    fn acquire(&self) -> DataResult<ConnectionHandle>;

    /// Takes a connection back. Never fails; problems are logged.
    fn release(&self, handle: ConnectionHandle);

    /// Diagnostic liveness check (`SELECT 1`).
    fn is_healthy(&self, handle: &ConnectionHandle) -> bool {
        handle
            .query_row("SELECT 1;", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn stats(&self) -> SourceStats;
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SourceStats {
        SourceStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }
}

/// `r2d2` pool of SQLite connections.
pub struct PooledSource {
    pool: Pool<SqliteConnectionManager>,
    translator: ErrorTranslator,
    counters: Counters,
    // Outlives pool reaping so a named in-memory database is never dropped.
    _anchor: Option<Mutex<Connection>>,
}

impl PooledSource {
    /// Builds the pool, eagerly opens idle connections and bootstraps schema.
    pub fn open(config: &DataSourceConfig) -> DbResult<Self> {
        let started_at = Instant::now();
        config.validate().map_err(DbError::InvalidConfig)?;
        info!(
            "event=source_open module=db status=start kind=pooled max_size={}",
            config.max_size
        );

        let busy_timeout = config.busy_timeout();
        let wal = matches!(config.location, DbLocation::File { .. });
        let (manager, anchor) = match &config.location {
            DbLocation::File { path } => (SqliteConnectionManager::file(path), None),
            DbLocation::Memory { name } => {
                let uri = memory_uri(name);
                let anchor = Connection::open(&uri)?;
                configure_connection(&anchor, busy_timeout, false)?;
                bootstrap_schema(&anchor)?;
                (SqliteConnectionManager::file(uri), Some(Mutex::new(anchor)))
            }
        };
        let manager = manager.with_init(move |conn| configure_connection(conn, busy_timeout, wal));

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .map_err(|err| {
                warn!(
                    "event=source_open module=db status=error kind=pooled duration_ms={} error_code=pool_build_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                DbError::Pool(err)
            })?;

        if anchor.is_none() {
            bootstrap_schema(&*pool.get()?)?;
        }
        info!(
            "event=source_open module=db status=ok kind=pooled duration_ms={}",
            started_at.elapsed().as_millis()
        );

        Ok(Self {
            pool,
            translator: ErrorTranslator::default(),
            counters: Counters::default(),
            _anchor: anchor,
        })
    }
}

impl ConnectionSource for PooledSource {
    fn acquire(&self) -> DataResult<ConnectionHandle> {
        let conn = self.pool.get().map_err(|err| {
            let translated = self.translator.translate_acquire(err);
            warn!(
                "event=conn_acquire module=db status=error kind=pooled error_code={}",
                translated.error_code()
            );
            translated
        })?;
        let handle = ConnectionHandle::new(HandleInner::Pooled(conn));
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(
            "event=conn_acquire module=db status=ok kind=pooled conn={}",
            handle.id()
        );
        Ok(handle)
    }

    fn release(&self, handle: ConnectionHandle) {
        reset_open_transaction(&handle);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(
            "event=conn_release module=db status=ok kind=pooled conn={}",
            handle.id()
        );
        drop(handle);
    }

    fn stats(&self) -> SourceStats {
        self.counters.snapshot()
    }
}

/// Opens a fresh physical connection per `acquire` and closes it on `release`.
pub struct DriverSource {
    target: String,
    busy_timeout: Duration,
    wal: bool,
    // Keeps a named in-memory database alive between acquisitions.
    _anchor: Option<Mutex<Connection>>,
    counters: Counters,
}

impl DriverSource {
    pub fn open(config: &DataSourceConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::InvalidConfig)?;
        let (target, wal) = match &config.location {
            DbLocation::File { path } => (path.to_string_lossy().into_owned(), true),
            DbLocation::Memory { name } => (memory_uri(name), false),
        };
        let busy_timeout = config.busy_timeout();

        let bootstrap = Connection::open(&target)?;
        configure_connection(&bootstrap, busy_timeout, wal)?;
        bootstrap_schema(&bootstrap)?;
        let anchor = if wal { None } else { Some(Mutex::new(bootstrap)) };
        info!("event=source_open module=db status=ok kind=driver");

        Ok(Self {
            target,
            busy_timeout,
            wal,
            _anchor: anchor,
            counters: Counters::default(),
        })
    }
}

impl ConnectionSource for DriverSource {
    fn acquire(&self) -> DataResult<ConnectionHandle> {
        let conn = Connection::open(&self.target)
            .and_then(|conn| {
                configure_connection(&conn, self.busy_timeout, self.wal)?;
                Ok(conn)
            })
            .map_err(|err| {
                warn!(
                    "event=conn_acquire module=db status=error kind=driver error_code=connection_failure error={}",
                    err
                );
                connection_failure("acquire", err)
            })?;
        let handle = ConnectionHandle::new(HandleInner::Direct(conn));
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(
            "event=conn_acquire module=db status=ok kind=driver conn={}",
            handle.id()
        );
        Ok(handle)
    }

    fn release(&self, handle: ConnectionHandle) {
        reset_open_transaction(&handle);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        let id = handle.id();
        match handle.inner {
            HandleInner::Direct(conn) => {
                if let Err((_, err)) = conn.close() {
                    warn!(
                        "event=conn_release module=db status=error kind=driver conn={} error_code=close_failed error={}",
                        id, err
                    );
                    return;
                }
            }
            HandleInner::Pooled(conn) => drop(conn),
        }
        debug!("event=conn_release module=db status=ok kind=driver conn={id}");
    }

    fn stats(&self) -> SourceStats {
        self.counters.snapshot()
    }
}

fn configure_connection(
    conn: &Connection,
    busy_timeout: Duration,
    wal: bool,
) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if wal {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
    }
    Ok(())
}

// The memdb VFS shares one database between connections of this process and
// reports lock conflicts as SQLITE_BUSY, so busy_timeout applies. Shared-cache
// mode would fail fast with SQLITE_LOCKED_SHAREDCACHE instead.
fn memory_uri(name: &str) -> String {
    format!("file:/{name}?vfs=memdb")
}

fn reset_open_transaction(handle: &ConnectionHandle) {
    if handle.is_autocommit() {
        return;
    }
    warn!(
        "event=conn_release module=db status=warn conn={} error_code=open_transaction_on_release",
        handle.id()
    );
    if let Err(err) = handle.execute_batch("ROLLBACK;") {
        warn!(
            "event=conn_release module=db status=error conn={} error_code=reset_failed error={}",
            handle.id(),
            err
        );
    }
}
