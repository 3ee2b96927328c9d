//! Shared connection access for repository methods.
//!
//! # Responsibility
//! - Run repository SQL on the connection bound to the caller's context, or
//!   on a connection acquired for that single call.
//! - Translate every driver error before it leaves the repository layer.
//!
//! # Invariants
//! - A connection acquired here is released before returning, on every path,
//!   including a panic inside the callback.
//! - A bound connection is used but never released here.
//! - Callers above this helper never see `rusqlite::Error`.

use crate::db::closer::{Acquired, ResourceCloser};
use crate::db::source::ConnectionSource;
use crate::translate::{DataAccessError, DataResult, ErrorTranslator};
use crate::tx::context::ExecutionContext;
use crate::tx::registry::TransactionRegistry;
use log::{error, trace};
use rusqlite::{Connection, Params, Row};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Connection access helper used by every repository.
pub struct DataAccess {
    source: Arc<dyn ConnectionSource>,
    registry: Arc<TransactionRegistry>,
    translator: ErrorTranslator,
    closer: ResourceCloser,
}

impl DataAccess {
    pub fn new(source: Arc<dyn ConnectionSource>, registry: Arc<TransactionRegistry>) -> Self {
        Self::with_translator(source, registry, ErrorTranslator::default())
    }

    pub fn with_translator(
        source: Arc<dyn ConnectionSource>,
        registry: Arc<TransactionRegistry>,
        translator: ErrorTranslator,
    ) -> Self {
        let closer = ResourceCloser::new(source.clone());
        Self {
            source,
            registry,
            translator,
            closer,
        }
    }

    /// Runs `f` on the context's bound connection, or on a fresh one that is
    /// released afterwards.
    pub fn with_connection<T, F>(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        sql: &str,
        f: F,
    ) -> DataResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let acquired = self.obtain(ctx)?;
        trace!(
            "event=repo_call module=repo status=start op={} ctx={} conn={} bound={}",
            operation,
            ctx,
            acquired.connection_id(),
            acquired.is_bound()
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| acquired.with_connection(f)));
        self.closer.release(ctx, acquired);
        match outcome {
            Ok(result) => result.map_err(|err| self.translate(ctx, operation, sql, err)),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Executes one write statement and returns the affected row count.
    pub fn execute_update<P: Params>(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        sql: &str,
        params: P,
    ) -> DataResult<usize> {
        self.with_connection(ctx, operation, sql, |conn| {
            let mut statement = conn.prepare(sql)?;
            let changed = statement.execute(params);
            self.closer.close_statement(Some(statement));
            changed
        })
    }

    /// Runs a query expected to match at most one row.
    pub fn query_optional<T, P, F>(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        sql: &str,
        params: P,
        map_row: F,
    ) -> DataResult<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(ctx, operation, sql, |conn| {
            let mut statement = conn.prepare(sql)?;
            let mut rows = statement.query(params)?;
            let found = match rows.next()? {
                Some(row) => Some(map_row(row)?),
                None => None,
            };
            drop(rows);
            self.closer.close_statement(Some(statement));
            Ok(found)
        })
    }

    fn obtain(&self, ctx: &ExecutionContext) -> DataResult<Acquired> {
        if let Some(bound) = self.registry.lookup(ctx) {
            return Ok(Acquired::Bound(bound));
        }
        self.source.acquire().map(Acquired::Owned)
    }

    fn translate(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        sql: &str,
        err: rusqlite::Error,
    ) -> DataAccessError {
        let translated = self.translator.translate(operation, sql, err);
        error!(
            "event=repo_call module=repo status=error op={} ctx={} error_code={} error={}",
            operation,
            ctx,
            translated.error_code(),
            translated
        );
        translated
    }
}
