//! SQLite connection plumbing.
//!
//! # Responsibility
//! - Supply physical connections through [`ConnectionSource`].
//! - Release statements and connections without leaking transaction-owned ones.
//! - Bootstrap the member table on a fresh database.
//!
//! # Invariants
//! - Every connection handed out has `foreign_keys=ON` and a busy timeout.
//! - A connection owned by an active transaction is never released here.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod closer;
pub mod schema;
pub mod source;

pub use closer::{Acquired, ResourceCloser};
pub use schema::bootstrap_schema;
pub use source::{
    ConnectionHandle, ConnectionSource, DriverSource, PooledSource, SourceStats,
};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while building a connection source or bootstrapping schema.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
    InvalidConfig(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "connection pool error: {err}"),
            Self::InvalidConfig(message) => write!(f, "invalid data source config: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Pool(err) => Some(err),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}
