//! Driver error translation into a technology-independent taxonomy.
//!
//! # Responsibility
//! - Convert `rusqlite`/`r2d2` failures into [`DataAccessError`].
//! - Keep vendor codes and messages as diagnostics only.
//!
//! # Invariants
//! - Translation is pure and infallible; the original error is always kept as
//!   `source()`.
//! - Unknown codes become [`DataAccessError::Unknown`], never dropped.

mod codes;

pub use codes::{CodeCategory, ErrorCodeTable};

use std::error::Error;
use std::fmt::{Display, Formatter};

// r2d2 0.8 renders a checkout timeout as exactly this text and appends
// `: <cause>` only when the last connect attempt failed. Its error type
// exposes nothing else to tell the two apart.
const POOL_TIMEOUT_MESSAGE: &str = "timed out waiting for connection";

pub type DataResult<T> = Result<T, DataAccessError>;

/// Low-level failure preserved inside every [`DataAccessError`].
#[derive(Debug)]
pub enum LowLevelError {
    Driver(rusqlite::Error),
    Pool(r2d2::Error),
}

impl Display for LowLevelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LowLevelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Driver(err) => Some(err),
            Self::Pool(err) => Some(err),
        }
    }
}

/// Diagnostic envelope shared by all abstract error kinds.
#[derive(Debug)]
pub struct ErrorContext {
    /// Repository or transaction operation that failed, e.g. `save`.
    pub operation: String,
    /// Statement text without bound values.
    pub sql: Option<String>,
    /// Vendor code reported by the driver, when it has one.
    pub code: Option<i32>,
    pub cause: LowLevelError,
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed", self.operation)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(sql) = &self.sql {
            write!(f, " [{sql}]")?;
        }
        write!(f, ": {}", self.cause)
    }
}

/// Constraint violation subkind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Unique or primary key collision. Callers may retry with another key.
    DuplicateKey,
    /// Any other integrity rule (foreign key, not null, check).
    DataIntegrity,
}

/// Abstract data access failure. Callers match on the variant, never on
/// vendor codes.
#[derive(Debug)]
pub enum DataAccessError {
    ConnectionFailure(ErrorContext),
    ConstraintViolation(ConstraintKind, ErrorContext),
    SyntaxOrAccess(ErrorContext),
    TransientFailure(ErrorContext),
    Unknown(ErrorContext),
}

impl DataAccessError {
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::ConnectionFailure(ctx)
            | Self::ConstraintViolation(_, ctx)
            | Self::SyntaxOrAccess(ctx)
            | Self::TransientFailure(ctx)
            | Self::Unknown(ctx) => ctx,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            Self::ConstraintViolation(ConstraintKind::DuplicateKey, _)
        )
    }

    /// Stable snake_case label used in `error_code=` log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailure(_) => "connection_failure",
            Self::ConstraintViolation(ConstraintKind::DuplicateKey, _) => "duplicate_key",
            Self::ConstraintViolation(ConstraintKind::DataIntegrity, _) => "data_integrity",
            Self::SyntaxOrAccess(_) => "syntax_or_access",
            Self::TransientFailure(_) => "transient_failure",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl Display for DataAccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailure(ctx) => write!(f, "connection failure: {ctx}"),
            Self::ConstraintViolation(ConstraintKind::DuplicateKey, ctx) => {
                write!(f, "duplicate key: {ctx}")
            }
            Self::ConstraintViolation(ConstraintKind::DataIntegrity, ctx) => {
                write!(f, "data integrity violation: {ctx}")
            }
            Self::SyntaxOrAccess(ctx) => write!(f, "bad sql or access: {ctx}"),
            Self::TransientFailure(ctx) => write!(f, "transient failure: {ctx}"),
            Self::Unknown(ctx) => write!(f, "uncategorized data access error: {ctx}"),
        }
    }
}

impl Error for DataAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.context().cause)
    }
}

/// Maps driver failures through an [`ErrorCodeTable`].
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    table: ErrorCodeTable,
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::new(ErrorCodeTable::sqlite())
    }
}

impl ErrorTranslator {
    pub fn new(table: ErrorCodeTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ErrorCodeTable {
        &self.table
    }

    /// Translates a statement-level driver error.
    pub fn translate(&self, operation: &str, sql: &str, error: rusqlite::Error) -> DataAccessError {
        let code = driver_code(&error);
        let misuse = is_api_misuse(&error);
        let context = ErrorContext {
            operation: operation.to_string(),
            sql: (!sql.is_empty()).then(|| sql.to_string()),
            code,
            cause: LowLevelError::Driver(error),
        };

        match code {
            Some(code) => self.categorize(code, context),
            None if misuse => DataAccessError::SyntaxOrAccess(context),
            None => DataAccessError::Unknown(context),
        }
    }

    /// Translates a vendor code reported by any driver.
    pub fn translate_code(
        &self,
        operation: &str,
        sql: &str,
        code: i32,
        cause: LowLevelError,
    ) -> DataAccessError {
        let context = ErrorContext {
            operation: operation.to_string(),
            sql: (!sql.is_empty()).then(|| sql.to_string()),
            code: Some(code),
            cause,
        };
        self.categorize(code, context)
    }

    /// Translates a pool checkout failure.
    ///
    /// A bare pool timeout means exhaustion and is transient; a timeout carrying
    /// a connect error means the database itself is unreachable.
    pub fn translate_acquire(&self, error: r2d2::Error) -> DataAccessError {
        let transient = error.to_string() == POOL_TIMEOUT_MESSAGE;
        let context = ErrorContext {
            operation: "acquire".to_string(),
            sql: None,
            code: None,
            cause: LowLevelError::Pool(error),
        };
        if transient {
            DataAccessError::TransientFailure(context)
        } else {
            DataAccessError::ConnectionFailure(context)
        }
    }

    fn categorize(&self, code: i32, context: ErrorContext) -> DataAccessError {
        match self.table.classify(code) {
            Some(CodeCategory::DuplicateKey) => {
                DataAccessError::ConstraintViolation(ConstraintKind::DuplicateKey, context)
            }
            Some(CodeCategory::DataIntegrity) => {
                DataAccessError::ConstraintViolation(ConstraintKind::DataIntegrity, context)
            }
            Some(CodeCategory::SyntaxOrAccess) => DataAccessError::SyntaxOrAccess(context),
            Some(CodeCategory::ConnectionFailure) => DataAccessError::ConnectionFailure(context),
            Some(CodeCategory::Transient) => DataAccessError::TransientFailure(context),
            None => DataAccessError::Unknown(context),
        }
    }
}

/// Wraps a failure to open a physical connection without a pool.
pub(crate) fn connection_failure(operation: &str, error: rusqlite::Error) -> DataAccessError {
    DataAccessError::ConnectionFailure(ErrorContext {
        operation: operation.to_string(),
        sql: None,
        code: driver_code(&error),
        cause: LowLevelError::Driver(error),
    })
}

fn driver_code(error: &rusqlite::Error) -> Option<i32> {
    match error {
        rusqlite::Error::SqliteFailure(ffi_error, _) => Some(ffi_error.extended_code),
        _ => None,
    }
}

fn is_api_misuse(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::InvalidQuery
            | rusqlite::Error::ExecuteReturnedResults
            | rusqlite::Error::MultipleStatement
    )
}
