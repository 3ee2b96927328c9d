//! Per-context transaction bindings.
//!
//! # Responsibility
//! - Hold at most one bound connection per [`ExecutionContext`].
//! - Hand the binding back on `unbind` so the manager owns teardown.
//!
//! # Invariants
//! - `bind` on an already bound context fails; a context never has two
//!   bindings.
//! - The map lock is held only for map operations, never while SQL runs.

use super::context::ExecutionContext;
use crate::db::source::{BoundConnection, ConnectionHandle};
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Illegal registry state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyBound(ExecutionContext),
    NotBound(ExecutionContext),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyBound(ctx) => {
                write!(f, "context {ctx} already has a bound transaction")
            }
            Self::NotBound(ctx) => write!(f, "context {ctx} has no bound transaction"),
        }
    }
}

impl Error for RegistryError {}

/// Active transaction state of one context.
#[derive(Debug)]
pub struct TransactionBinding {
    pub ctx: ExecutionContext,
    pub connection: BoundConnection,
    /// Auto-commit flag observed before the transaction began.
    pub saved_autocommit: bool,
    pub is_new: bool,
    /// Set when a joined participant asked for rollback.
    pub rollback_only: bool,
}

/// Concurrency-safe map of context to binding.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    bindings: Mutex<HashMap<ExecutionContext, TransactionBinding>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handle` to `ctx` and returns the shared reference now held by
    /// the registry.
    pub fn bind(
        &self,
        ctx: ExecutionContext,
        handle: ConnectionHandle,
        saved_autocommit: bool,
        is_new: bool,
    ) -> Result<BoundConnection, (RegistryError, ConnectionHandle)> {
        let mut bindings = self.bindings.lock();
        if bindings.contains_key(&ctx) {
            return Err((RegistryError::AlreadyBound(ctx), handle));
        }
        let conn_id = handle.id();
        let connection = Arc::new(Mutex::new(handle));
        bindings.insert(
            ctx,
            TransactionBinding {
                ctx,
                connection: connection.clone(),
                saved_autocommit,
                is_new,
                rollback_only: false,
            },
        );
        trace!("event=tx_bind module=tx status=ok ctx={ctx} conn={conn_id}");
        Ok(connection)
    }

    /// Bound connection for `ctx`, if a transaction is active.
    pub fn lookup(&self, ctx: &ExecutionContext) -> Option<BoundConnection> {
        self.bindings
            .lock()
            .get(ctx)
            .map(|binding| binding.connection.clone())
    }

    pub fn is_bound(&self, ctx: &ExecutionContext) -> bool {
        self.bindings.lock().contains_key(ctx)
    }

    /// Removes and returns the binding of `ctx`.
    pub fn unbind(&self, ctx: &ExecutionContext) -> Result<TransactionBinding, RegistryError> {
        let binding = self
            .bindings
            .lock()
            .remove(ctx)
            .ok_or(RegistryError::NotBound(*ctx))?;
        trace!("event=tx_unbind module=tx status=ok ctx={ctx}");
        Ok(binding)
    }

    pub fn mark_rollback_only(&self, ctx: &ExecutionContext) -> Result<(), RegistryError> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(ctx).ok_or(RegistryError::NotBound(*ctx))?;
        binding.rollback_only = true;
        Ok(())
    }

    pub fn is_rollback_only(&self, ctx: &ExecutionContext) -> bool {
        self.bindings
            .lock()
            .get(ctx)
            .is_some_and(|binding| binding.rollback_only)
    }

    /// Contexts that currently hold a binding. Non-empty between units of
    /// work means a transaction leaked.
    pub fn active_contexts(&self) -> Vec<ExecutionContext> {
        self.bindings.lock().keys().copied().collect()
    }
}
