//! SQLite schema for the document store
//!
//! Every logical collection lives in one `documents` table keyed by
//! `(collection, id)`. The `id` column has no type affinity so integer,
//! blob and text identifiers keep their native ordering.

use rusqlite::{Connection, OptionalExtension, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Enumerated for blackboard and shard discovery
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );

    -- body is the JSON object of every attribute except _id
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
        id NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );
"#;

/// Create the tables and record the schema version
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Recorded schema version; `None` on a fresh database
pub fn schema_version(conn: &Connection) -> Result<Option<i32>> {
    let recorded: Option<String> = conn
        .query_row("SELECT value FROM schema_info WHERE key = 'version'", [], |row| row.get(0))
        .optional()?;
    Ok(recorded.and_then(|v| v.parse().ok()))
}

/// Check if the schema is missing or older than this build
pub fn needs_init(conn: &Connection) -> bool {
    // a missing schema_info table is an error here, and means "fresh"
    match schema_version(conn) {
        Ok(Some(version)) => version < SCHEMA_VERSION,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_database_needs_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();
        assert_eq!(table_names(&conn), vec!["collections", "documents", "schema_info"]);
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn));

        // idempotent
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_dropping_collection_cascades() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        init_schema(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO collections (name, created_at) VALUES ('C', 0);
             INSERT INTO documents (collection, id, body) VALUES ('C', 1, '{}'), ('C', 2, '{}');
             DELETE FROM collections WHERE name = 'C';",
        )
        .unwrap();

        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_id_column_keeps_native_types() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO collections (name, created_at) VALUES ('C', 0);
             INSERT INTO documents (collection, id, body) VALUES ('C', 10, '{}'), ('C', 2, '{}');",
        )
        .unwrap();

        let mut stmt = conn
            .prepare("SELECT id FROM documents WHERE collection = 'C' ORDER BY id")
            .unwrap();
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // integer order, not text order
        assert_eq!(ids, vec![2, 10]);
    }
}
