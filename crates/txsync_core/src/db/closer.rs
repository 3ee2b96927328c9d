//! Statement and connection release.
//!
//! # Responsibility
//! - Finalize prepared statements and report failures as diagnostics.
//! - Give owned connections back to their source; leave bound ones alone.
//!
//! # Invariants
//! - Nothing here returns an error to the caller.
//! - A [`Acquired::Bound`] connection is never released; the transaction
//!   manager owns it.

use super::source::{BoundConnection, ConnectionHandle, ConnectionSource};
use crate::tx::context::ExecutionContext;
use log::{trace, warn};
use rusqlite::{Connection, Statement};
use std::sync::Arc;

/// Connection obtained by one repository call.
#[derive(Debug)]
pub enum Acquired {
    /// Joined the transaction bound to the caller's context.
    Bound(BoundConnection),
    /// Acquired for this call only.
    Owned(ConnectionHandle),
}

impl Acquired {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    pub fn connection_id(&self) -> u64 {
        match self {
            Self::Bound(bound) => bound.lock().id(),
            Self::Owned(handle) => handle.id(),
        }
    }

    /// Runs `f` against the underlying connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        match self {
            Self::Bound(bound) => {
                let guard = bound.lock();
                f(&guard)
            }
            Self::Owned(handle) => f(handle),
        }
    }
}

/// Releases resources in reverse acquisition order.
#[derive(Clone)]
pub struct ResourceCloser {
    source: Arc<dyn ConnectionSource>,
}

impl ResourceCloser {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self { source }
    }

    /// Finalizes a statement. Result cursors are dropped before this point.
    pub fn close_statement(&self, statement: Option<Statement<'_>>) {
        let Some(statement) = statement else {
            return;
        };
        if let Err(err) = statement.finalize() {
            warn!(
                "event=resource_close module=db status=error resource=statement error_code=finalize_failed error={}",
                err
            );
        }
    }

    /// Returns an owned connection to the source. Bound connections stay with
    /// the transaction.
    pub fn release(&self, ctx: &ExecutionContext, acquired: Acquired) {
        match acquired {
            Acquired::Bound(bound) => {
                trace!(
                    "event=resource_close module=db status=skip resource=connection ctx={} conn={} reason=transaction_bound",
                    ctx,
                    bound.lock().id()
                );
            }
            Acquired::Owned(handle) => self.source.release(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Acquired, ResourceCloser};
    use crate::config::DataSourceConfig;
    use crate::db::source::{ConnectionSource, PooledSource};
    use crate::tx::context::ExecutionContext;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn open_source() -> (tempfile::TempDir, Arc<PooledSource>) {
        let dir = tempfile::tempdir().unwrap();
        let source = PooledSource::open(&DataSourceConfig::file(dir.path().join("closer.db"))).unwrap();
        (dir, Arc::new(source))
    }

    #[test]
    fn owned_connection_goes_back_to_source() {
        let (_dir, source) = open_source();
        let closer = ResourceCloser::new(source.clone());
        let ctx = ExecutionContext::new();

        let acquired = Acquired::Owned(source.acquire().unwrap());
        assert!(!acquired.is_bound());
        closer.release(&ctx, acquired);

        assert_eq!(source.stats().outstanding(), 0);
    }

    #[test]
    fn bound_connection_is_never_released() {
        let (_dir, source) = open_source();
        let closer = ResourceCloser::new(source.clone());
        let ctx = ExecutionContext::new();

        let bound = Arc::new(Mutex::new(source.acquire().unwrap()));
        closer.release(&ctx, Acquired::Bound(bound.clone()));

        assert_eq!(source.stats().outstanding(), 1);
        assert!(source.is_healthy(&bound.lock()));
    }

    #[test]
    fn statement_is_finalized_before_connection_release() {
        let (_dir, source) = open_source();
        let closer = ResourceCloser::new(source.clone());
        let ctx = ExecutionContext::new();
        let acquired = Acquired::Owned(source.acquire().unwrap());

        acquired.with_connection(|conn| {
            let statement = conn.prepare("SELECT COUNT(*) FROM member;").unwrap();
            closer.close_statement(Some(statement));
            closer.close_statement(None);
        });
        closer.release(&ctx, acquired);

        assert_eq!(source.stats().outstanding(), 0);
    }
}
