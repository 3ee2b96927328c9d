//! Connection-scoped transaction synchronization.
//!
//! # Responsibility
//! - Bind one physical connection to an [`ExecutionContext`] for the lifetime
//!   of a transaction.
//! - Decide between starting a transaction and joining the bound one.
//! - Report transaction infrastructure failures apart from business failures.
//!
//! # Invariants
//! - Only the context that started a transaction commits, rolls back or
//!   releases its connection.
//! - Auto-commit is restored before the connection leaves the transaction.

use crate::translate::DataAccessError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod context;
pub mod manager;
pub mod registry;
pub mod template;

pub use context::ExecutionContext;
pub use manager::{TransactionManager, TransactionStatus};
pub use registry::{RegistryError, TransactionBinding, TransactionRegistry};
pub use template::TransactionTemplate;

pub type TxResult<T> = Result<T, TransactionError>;

/// Transaction infrastructure failure.
#[derive(Debug)]
pub enum TransactionError {
    /// No transaction could be started. Nothing ran.
    Begin(DataAccessError),
    /// Work succeeded but commit failed. Changes were rolled back.
    Commit(DataAccessError),
    /// A joined participant requested rollback, so the owner rolled back
    /// instead of committing.
    RollbackOnly(ExecutionContext),
    IllegalState(RegistryError),
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin(err) => write!(f, "could not begin transaction: {err}"),
            Self::Commit(err) => write!(f, "could not commit transaction: {err}"),
            Self::RollbackOnly(ctx) => write!(
                f,
                "transaction of context {ctx} was rolled back because a participant marked it rollback-only"
            ),
            Self::IllegalState(err) => write!(f, "illegal transaction state: {err}"),
        }
    }
}

impl Error for TransactionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Begin(err) | Self::Commit(err) => Some(err),
            Self::RollbackOnly(_) => None,
            Self::IllegalState(err) => Some(err),
        }
    }
}

impl From<RegistryError> for TransactionError {
    fn from(value: RegistryError) -> Self {
        Self::IllegalState(value)
    }
}

/// Outcome error of a unit of work run through [`TransactionTemplate`].
#[derive(Debug)]
pub enum TxError<E> {
    /// The unit of work failed; its changes were rolled back.
    Work(E),
    /// Transaction infrastructure failed.
    Tx(TransactionError),
}

impl<E> TxError<E> {
    /// True when the work itself succeeded but its changes were not persisted.
    pub fn is_commit_failure(&self) -> bool {
        matches!(
            self,
            Self::Tx(TransactionError::Commit(_) | TransactionError::RollbackOnly(_))
        )
    }

    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(err) => Some(err),
            Self::Tx(_) => None,
        }
    }
}

impl<E: Display> Display for TxError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Work(err) => write!(f, "{err}"),
            Self::Tx(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for TxError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Work(err) => Some(err),
            Self::Tx(err) => Some(err),
        }
    }
}

impl<E> From<TransactionError> for TxError<E> {
    fn from(value: TransactionError) -> Self {
        Self::Tx(value)
    }
}
