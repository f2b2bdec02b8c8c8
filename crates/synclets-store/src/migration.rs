//! Schema migrations for the SQLite connectors.
//!
//! Each migration moves the schema from version N to N+1 inside a single
//! transaction. Applied versions are recorded in `schema_migrations`.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::error::{ConnectorError, Result};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Safe to call repeatedly.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(ConnectorError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }
        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(ConnectorError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: both trees.
///
/// Addresses are stored as JSON arrays of ids. `*_nodes` tables record the
/// parent/child edges so children can be listed at any ancestor.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE data_nodes (
            parent TEXT NOT NULL,
            id TEXT NOT NULL,
            PRIMARY KEY (parent, id)
        );

        CREATE TABLE data_values (
            address TEXT PRIMARY KEY,
            value BLOB NOT NULL            -- CBOR-encoded leaf value
        );

        CREATE TABLE meta_nodes (
            parent TEXT NOT NULL,
            id TEXT NOT NULL,
            PRIMARY KEY (parent, id)
        );

        CREATE TABLE meta_timestamps (
            address TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL        -- 16-char HLC string
        );

        CREATE TABLE meta_hashes (
            address TEXT PRIMARY KEY,
            hash INTEGER NOT NULL          -- u32 XOR of descendant timestamp hashes
        );
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "data_nodes",
            "data_values",
            "meta_hashes",
            "meta_nodes",
            "meta_timestamps",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, 0)",
            [CURRENT_VERSION + 1],
        )
        .unwrap();

        assert!(matches!(
            migrate(&mut conn),
            Err(ConnectorError::Migration(_))
        ));
    }
}
