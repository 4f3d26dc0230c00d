//! Relational schema and migrations.
//!
//! The schema version lives in SQLite's `PRAGMA user_version`. Each entry of
//! [`MIGRATIONS`] moves the schema up by one version and only ever adds
//! tables, columns or indices. Pending migrations run in one transaction at
//! startup: either all of them apply or the database is left untouched.

use crate::publish::StoreError;
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // 1: gallery rows and per-lineage view deduplication
    "CREATE TABLE gallery (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        parent            INTEGER NOT NULL DEFAULT 0,
        token             TEXT UNIQUE,
        document          TEXT,
        title             TEXT,
        description       TEXT,
        screenshot        TEXT,
        author            TEXT,
        license           TEXT,
        views             INTEGER NOT NULL DEFAULT 0,
        modification_date TEXT NOT NULL,
        state             INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX gallery_parent ON gallery (parent);
    CREATE INDEX gallery_views_state ON gallery (views, state);
    CREATE INDEX gallery_modification_date_state ON gallery (modification_date, state);

    CREATE TABLE views (
        subject INTEGER NOT NULL,
        ip_hash TEXT NOT NULL
    );
    CREATE UNIQUE INDEX views_subject_ip_hash ON views (subject, ip_hash);",
];

/// Schema version this build knows how to produce.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Version recorded in the database file.
pub fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// Returns the version found before migrating. A database written by a newer
/// build, or carrying a negative version, is refused rather than guessed at.
pub fn migrate(conn: &mut Connection) -> Result<i64, StoreError> {
    let found = current_version(conn)?;
    let applied = usize::try_from(found).map_err(|_| StoreError::SchemaInvalid(found))?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(found);
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        tx.execute_batch(sql)?;
        tracing::info!(version = index + 1, "schema migration applied");
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(found)
}
