//! Member table bootstrap.
//!
//! Creates the single table used by the member repository. Idempotent; this is
//! not a migration runner.

use super::DbResult;
use log::info;
use rusqlite::Connection;

const MEMBER_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS member (
    member_id TEXT PRIMARY KEY NOT NULL,
    money INTEGER NOT NULL DEFAULT 0
);";

/// Ensures the `member` table exists on the given connection.
pub fn bootstrap_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(MEMBER_TABLE_SQL)?;
    info!("event=schema_bootstrap module=db status=ok table=member");
    Ok(())
}
