//! v001 -- Initial schema creation.
//!
//! Creates the single `kv` table holding whole JSON values.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,               -- serialized JSON, replaced wholesale
    updated_at INTEGER NOT NULL             -- Unix seconds of the last write
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
