//! Connection-scoped transaction synchronization over SQLite.
//!
//! Repository calls made with the same [`ExecutionContext`] between
//! `begin` and `commit`/`rollback` share one physical connection; calls made
//! outside a transaction acquire and release their own. Driver errors are
//! translated into [`DataAccessError`] before they reach callers.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod translate;
pub mod tx;

pub use config::{DataSourceConfig, DbLocation};
pub use db::{
    Acquired, ConnectionHandle, ConnectionSource, DbError, DbResult, DriverSource, PooledSource,
    ResourceCloser, SourceStats,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::member::{Member, MemberId, MemberValidationError};
pub use repo::access::DataAccess;
pub use repo::member_repo::{MemberRepository, RepoError, RepoResult, SqliteMemberRepository};
pub use service::member_service::{MemberService, MemberServiceError, DEFAULT_BALANCE_LIMIT};
pub use translate::{
    ConstraintKind, DataAccessError, DataResult, ErrorCodeTable, ErrorContext, ErrorTranslator,
    LowLevelError,
};
pub use tx::{
    ExecutionContext, RegistryError, TransactionError, TransactionManager, TransactionRegistry,
    TransactionStatus, TransactionTemplate, TxError, TxResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
