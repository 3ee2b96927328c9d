//! Vendor error code tables.
//!
//! # Responsibility
//! - Group driver error codes into abstract categories per database vendor.
//!
//! # Invariants
//! - A code belongs to at most one category; lookup order is
//!   duplicate key, data integrity, syntax/access, connection, transient.

/// Abstract category a vendor code resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCategory {
    DuplicateKey,
    DataIntegrity,
    SyntaxOrAccess,
    ConnectionFailure,
    Transient,
}

/// Fixed lookup table from vendor codes to [`CodeCategory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorCodeTable {
    pub duplicate_key: Vec<i32>,
    pub data_integrity: Vec<i32>,
    pub syntax_or_access: Vec<i32>,
    pub connection_failure: Vec<i32>,
    pub transient: Vec<i32>,
    /// Retry lookup with the low byte of the code when the full code misses.
    ///
    /// SQLite extended result codes carry their primary code in the low 8 bits.
    pub match_primary_code: bool,
}

impl ErrorCodeTable {
    /// SQLite result codes (extended codes first, primary codes as fallback).
    pub fn sqlite() -> Self {
        Self {
            // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
            duplicate_key: vec![1555, 2067],
            // SQLITE_CONSTRAINT, _CHECK, _FOREIGNKEY, _NOTNULL, _TRIGGER, SQLITE_TOOBIG
            data_integrity: vec![19, 275, 787, 1299, 1811, 18],
            // SQLITE_ERROR, SQLITE_PERM, SQLITE_READONLY, SQLITE_AUTH, SQLITE_MISMATCH, SQLITE_RANGE
            syntax_or_access: vec![1, 3, 8, 23, 20, 25],
            // SQLITE_IOERR, SQLITE_CORRUPT, SQLITE_CANTOPEN, SQLITE_NOTADB
            connection_failure: vec![10, 11, 14, 26],
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_NOMEM, SQLITE_INTERRUPT, SQLITE_PROTOCOL
            transient: vec![5, 6, 7, 9, 15],
            match_primary_code: true,
        }
    }

    /// H2 vendor codes as reported by its JDBC driver.
    pub fn h2() -> Self {
        Self {
            duplicate_key: vec![23001, 23505],
            data_integrity: vec![
                22001, 22003, 22012, 22018, 22025, 23000, 23002, 23003, 23502, 23503, 23506,
                23507, 23513,
            ],
            syntax_or_access: vec![
                42000, 42001, 42101, 42102, 42111, 42112, 42121, 42122, 42132,
            ],
            connection_failure: vec![90046, 90100, 90117, 90121, 90126],
            transient: vec![50200],
            match_primary_code: false,
        }
    }

    /// Resolves one vendor code. Returns `None` for codes the table does not know.
    pub fn classify(&self, code: i32) -> Option<CodeCategory> {
        self.lookup(code).or_else(|| {
            let primary = code & 0xff;
            if self.match_primary_code && primary != code {
                self.lookup(primary)
            } else {
                None
            }
        })
    }

    fn lookup(&self, code: i32) -> Option<CodeCategory> {
        let groups = [
            (&self.duplicate_key, CodeCategory::DuplicateKey),
            (&self.data_integrity, CodeCategory::DataIntegrity),
            (&self.syntax_or_access, CodeCategory::SyntaxOrAccess),
            (&self.connection_failure, CodeCategory::ConnectionFailure),
            (&self.transient, CodeCategory::Transient),
        ];
        groups
            .into_iter()
            .find(|(codes, _)| codes.contains(&code))
            .map(|(_, category)| category)
    }
}
