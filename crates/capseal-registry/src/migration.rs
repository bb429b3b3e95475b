//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use capseal_core::now_millis;

use crate::error::{RegistryError, Result};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
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

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(RegistryError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: capability records.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE capabilities (
            capability_id INTEGER PRIMARY KEY,  -- allocated from 1, never reused
            owner BLOB NOT NULL,                -- 32 bytes, Ed25519 public key
            creator BLOB NOT NULL,              -- 32 bytes, immutable
            content_pointer TEXT,               -- NULL until sealed, set once
            created_at_block INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX idx_capabilities_owner ON capabilities(owner);
        CREATE INDEX idx_capabilities_creator ON capabilities(creator);
        "#,
    )?;

    Ok(())
}

/// Migration v2: sealed blocks and their event log.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE blocks (
            block_number INTEGER PRIMARY KEY,
            sealed_at INTEGER NOT NULL
        );

        CREATE TABLE events (
            block_number INTEGER NOT NULL REFERENCES blocks(block_number),
            log_index INTEGER NOT NULL,
            capability_id INTEGER NOT NULL,
            event BLOB NOT NULL,                -- CBOR-encoded LedgerEvent
            PRIMARY KEY (block_number, log_index)
        );

        CREATE INDEX idx_events_capability ON events(capability_id);
        "#,
    )?;

    Ok(())
}
