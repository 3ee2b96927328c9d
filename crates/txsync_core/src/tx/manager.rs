//! Transaction begin/commit/rollback and connection teardown.
//!
//! # Responsibility
//! - Start a transaction on a fresh connection or join the bound one.
//! - Finish owned transactions: commit or roll back, unbind, restore
//!   auto-commit, release.
//!
//! # Invariants
//! - Joined (`is_new == false`) statuses never commit, roll back or release.
//! - Every owned transaction ends with exactly one `unbind` and one release,
//!   whatever the outcome.
//! - Commit failures propagate; rollback failures are logged only.

use super::context::ExecutionContext;
use super::registry::{RegistryError, TransactionBinding, TransactionRegistry};
use super::{TransactionError, TxResult};
use crate::db::source::{BoundConnection, ConnectionHandle, ConnectionSource};
use crate::translate::ErrorTranslator;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const BEGIN_SQL: &str = "BEGIN IMMEDIATE;";
const COMMIT_SQL: &str = "COMMIT;";
const ROLLBACK_SQL: &str = "ROLLBACK;";

/// Handle returned by [`TransactionManager::begin`]. Consumed by commit or
/// rollback.
#[derive(Debug)]
#[must_use = "a transaction status must be passed to commit or rollback"]
pub struct TransactionStatus {
    ctx: ExecutionContext,
    is_new: bool,
    connection_id: u64,
    started_at: Instant,
}

impl TransactionStatus {
    pub fn ctx(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// True when this status started the physical transaction.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

/// Coordinates transactions across repository calls of one context.
pub struct TransactionManager {
    source: Arc<dyn ConnectionSource>,
    registry: Arc<TransactionRegistry>,
    translator: ErrorTranslator,
    stranded: AtomicU64,
}

impl TransactionManager {
    pub fn new(source: Arc<dyn ConnectionSource>, registry: Arc<TransactionRegistry>) -> Self {
        Self::with_translator(source, registry, ErrorTranslator::default())
    }

    pub fn with_translator(
        source: Arc<dyn ConnectionSource>,
        registry: Arc<TransactionRegistry>,
        translator: ErrorTranslator,
    ) -> Self {
        Self {
            source,
            registry,
            translator,
            stranded: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    /// Finished transactions whose connection could not go back through
    /// [`ConnectionSource::release`] because a caller still held a
    /// [`BoundConnection`] clone.
    ///
    /// Keeping a clone past commit or rollback violates the registry contract.
    /// The physical connection is dropped with the last clone, but the source
    /// never counts it as released.
    pub fn stranded_connections(&self) -> u64 {
        self.stranded.load(Ordering::SeqCst)
    }

    /// Starts a transaction for `ctx`, or joins the one already bound.
    pub fn begin(&self, ctx: &ExecutionContext) -> TxResult<TransactionStatus> {
        if let Some(bound) = self.registry.lookup(ctx) {
            let connection_id = bound.lock().id();
            debug!("event=tx_begin module=tx status=ok mode=join ctx={ctx} conn={connection_id}");
            return Ok(TransactionStatus {
                ctx: *ctx,
                is_new: false,
                connection_id,
                started_at: Instant::now(),
            });
        }

        let started_at = Instant::now();
        let handle = self.source.acquire().map_err(|err| {
            error!(
                "event=tx_begin module=tx status=error ctx={} error_code={} error={}",
                ctx,
                err.error_code(),
                err
            );
            TransactionError::Begin(err)
        })?;

        let saved_autocommit = handle.is_autocommit();
        if let Err(err) = handle.execute_batch(BEGIN_SQL) {
            let translated = self.translator.translate("begin", BEGIN_SQL, err);
            error!(
                "event=tx_begin module=tx status=error ctx={} conn={} error_code={} error={}",
                ctx,
                handle.id(),
                translated.error_code(),
                translated
            );
            self.source.release(handle);
            return Err(TransactionError::Begin(translated));
        }

        let connection_id = handle.id();
        if let Err((err, handle)) = self.registry.bind(*ctx, handle, saved_autocommit, true) {
            error!(
                "event=tx_begin module=tx status=error ctx={ctx} conn={connection_id} error_code=already_bound"
            );
            self.abort_unbound(ctx, handle, saved_autocommit);
            return Err(TransactionError::IllegalState(err));
        }

        info!("event=tx_begin module=tx status=ok mode=new ctx={ctx} conn={connection_id}");
        Ok(TransactionStatus {
            ctx: *ctx,
            is_new: true,
            connection_id,
            started_at,
        })
    }

    /// Commits an owned transaction. Joined statuses are a no-op.
    pub fn commit(&self, status: TransactionStatus) -> TxResult<()> {
        let ctx = status.ctx;
        if !status.is_new {
            debug!("event=tx_commit module=tx status=skip mode=join ctx={ctx}");
            return Ok(());
        }

        let bound = self.bound(&ctx)?;
        if self.registry.is_rollback_only(&ctx) {
            self.rollback_quietly(&ctx, &bound);
            drop(bound);
            self.finish(&ctx)?;
            warn!(
                "event=tx_commit module=tx status=error ctx={} duration_ms={} error_code=rollback_only",
                ctx,
                status.started_at.elapsed().as_millis()
            );
            return Err(TransactionError::RollbackOnly(ctx));
        }

        let outcome = bound.lock().execute_batch(COMMIT_SQL);
        match outcome {
            Ok(()) => {
                drop(bound);
                self.finish(&ctx)?;
                info!(
                    "event=tx_commit module=tx status=ok ctx={} conn={} duration_ms={}",
                    ctx,
                    status.connection_id,
                    status.started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                let translated = self.translator.translate("commit", COMMIT_SQL, err);
                error!(
                    "event=tx_commit module=tx status=error ctx={} conn={} duration_ms={} error_code={} error={}",
                    ctx,
                    status.connection_id,
                    status.started_at.elapsed().as_millis(),
                    translated.error_code(),
                    translated
                );
                self.rollback_quietly(&ctx, &bound);
                drop(bound);
                if let Err(finish_err) = self.finish(&ctx) {
                    warn!(
                        "event=tx_commit module=tx status=error ctx={ctx} error_code=cleanup_failed error={finish_err}"
                    );
                }
                Err(TransactionError::Commit(translated))
            }
        }
    }

    /// Rolls back an owned transaction. A joined status only marks the owner's
    /// transaction rollback-only.
    pub fn rollback(&self, status: TransactionStatus) -> TxResult<()> {
        let ctx = status.ctx;
        if !status.is_new {
            self.registry.mark_rollback_only(&ctx)?;
            debug!("event=tx_rollback module=tx status=skip mode=join ctx={ctx} rollback_only=true");
            return Ok(());
        }

        let bound = self.bound(&ctx)?;
        self.rollback_quietly(&ctx, &bound);
        drop(bound);
        self.finish(&ctx)?;
        info!(
            "event=tx_rollback module=tx status=ok ctx={} conn={} duration_ms={}",
            ctx,
            status.connection_id,
            status.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Commits when `succeeded`, rolls back otherwise.
    pub fn complete(&self, status: TransactionStatus, succeeded: bool) -> TxResult<()> {
        if succeeded {
            self.commit(status)
        } else {
            self.rollback(status)
        }
    }

    /// Rolls back and releases a binding whose owner is gone.
    ///
    /// Returns `false` when `ctx` had no binding.
    pub fn rollback_abandoned(&self, ctx: &ExecutionContext) -> bool {
        let Some(bound) = self.registry.lookup(ctx) else {
            return false;
        };
        warn!("event=tx_abandon module=tx status=start ctx={ctx}");
        self.rollback_quietly(ctx, &bound);
        drop(bound);
        match self.finish(ctx) {
            Ok(()) => true,
            Err(err) => {
                warn!("event=tx_abandon module=tx status=error ctx={ctx} error={err}");
                false
            }
        }
    }

    fn bound(&self, ctx: &ExecutionContext) -> Result<BoundConnection, RegistryError> {
        self.registry
            .lookup(ctx)
            .ok_or(RegistryError::NotBound(*ctx))
    }

    fn rollback_quietly(&self, ctx: &ExecutionContext, bound: &BoundConnection) {
        let handle = bound.lock();
        if handle.is_autocommit() {
            return;
        }
        if let Err(err) = handle.execute_batch(ROLLBACK_SQL) {
            let translated = self.translator.translate("rollback", ROLLBACK_SQL, err);
            warn!(
                "event=tx_rollback module=tx status=error ctx={} conn={} error_code={} error={}",
                ctx,
                handle.id(),
                translated.error_code(),
                translated
            );
        }
    }

    fn finish(&self, ctx: &ExecutionContext) -> Result<(), RegistryError> {
        let binding = self.registry.unbind(ctx)?;
        self.restore_and_release(binding);
        Ok(())
    }

    fn restore_and_release(&self, binding: TransactionBinding) {
        let TransactionBinding {
            ctx,
            connection,
            saved_autocommit,
            ..
        } = binding;
        match Arc::try_unwrap(connection) {
            Ok(handle) => {
                let handle = handle.into_inner();
                restore_autocommit(&ctx, &handle, saved_autocommit);
                self.source.release(handle);
            }
            Err(shared) => {
                let handle = shared.lock();
                restore_autocommit(&ctx, &handle, saved_autocommit);
                self.stranded.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "event=tx_release module=tx status=error ctx={} conn={} error_code=connection_still_referenced",
                    ctx,
                    handle.id()
                );
            }
        }
    }

    fn abort_unbound(&self, ctx: &ExecutionContext, handle: ConnectionHandle, saved: bool) {
        if let Err(err) = handle.execute_batch(ROLLBACK_SQL) {
            warn!(
                "event=tx_rollback module=tx status=error ctx={} conn={} error_code=rollback_failed error={}",
                ctx,
                handle.id(),
                err
            );
        }
        restore_autocommit(ctx, &handle, saved);
        self.source.release(handle);
    }
}

fn restore_autocommit(ctx: &ExecutionContext, conn: &Connection, saved_autocommit: bool) {
    if !saved_autocommit || conn.is_autocommit() {
        return;
    }
    // SQLite leaves manual mode only by ending the open transaction.
    if let Err(err) = conn.execute_batch(ROLLBACK_SQL) {
        warn!(
            "event=tx_restore module=tx status=error ctx={ctx} error_code=autocommit_restore_failed error={err}"
        );
    }
}
