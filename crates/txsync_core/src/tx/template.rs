//! Run-in-transaction wrapper.
//!
//! # Responsibility
//! - Pair every `begin` with exactly one commit or rollback around a unit of
//!   work, including when the work panics.
//!
//! # Invariants
//! - `Err` from the work rolls back and surfaces as [`TxError::Work`].
//! - A panic in the work rolls back, then keeps unwinding.

use super::context::ExecutionContext;
use super::manager::{TransactionManager, TransactionStatus};
use super::TxError;
use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Executes closures inside a transaction bound to the caller's context.
#[derive(Clone)]
pub struct TransactionTemplate {
    manager: Arc<TransactionManager>,
}

impl TransactionTemplate {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Runs `work` transactionally for `ctx`.
    ///
    /// Joins the transaction already bound to `ctx`, if any; in that case the
    /// outer owner decides the final outcome.
    pub fn execute<T, E, F>(&self, ctx: &ExecutionContext, work: F) -> Result<T, TxError<E>>
    where
        F: FnOnce(&TransactionStatus) -> Result<T, E>,
    {
        let status = self.manager.begin(ctx)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&status)));

        match outcome {
            Ok(Ok(value)) => {
                self.manager.commit(status)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.rollback_after_failure(status, "work_failed");
                Err(TxError::Work(err))
            }
            Err(payload) => {
                self.rollback_after_failure(status, "work_panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    fn rollback_after_failure(&self, status: TransactionStatus, reason: &str) {
        let ctx = *status.ctx();
        if let Err(err) = self.manager.rollback(status) {
            error!(
                "event=tx_rollback module=tx status=error ctx={ctx} reason={reason} error={err}"
            );
        }
    }
}
