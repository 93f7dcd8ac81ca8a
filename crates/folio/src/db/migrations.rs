//! Schema migrations.
//!
//! Each migration is one embedded SQL file. Applied versions are recorded in
//! `_migrations`; a migration and its record commit together.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "content tables",
        sql: include_str!("sql/001_create_content.sql"),
    },
    Migration {
        version: 2,
        description: "publish queue",
        sql: include_str!("sql/002_create_queue.sql"),
    },
    Migration {
        version: 3,
        description: "fileinfo store",
        sql: include_str!("sql/003_create_fileinfos.sql"),
    },
    Migration {
        version: 4,
        description: "null-aware queue coalescing key",
        sql: include_str!("sql/004_queue_key_nulls.sql"),
    },
    Migration {
        version: 5,
        description: "archive listings",
        sql: include_str!("sql/005_create_archive_listings.sql"),
    },
];

fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    let version = conn.query_row("SELECT IFNULL(MAX(version), 0) FROM _migrations", [], |r| {
        r.get(0)
    })?;
    Ok(version)
}

/// Brings the schema up to date.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = applied_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!(
            "Applying schema v{} ({})",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|source| DatabaseError::Migration {
                version: migration.version,
                description: migration.description,
                source,
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
