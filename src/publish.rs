//! Transactional gallery lifecycle on SQLite.
//!
//! Every operation runs as one transaction. `rusqlite::Transaction` rolls
//! back when dropped, so any `?` before `commit()` leaves the database as it
//! was. Write transactions are opened `IMMEDIATE` so that two processes
//! sharing a database file serialize on the write lock up front instead of
//! failing on upgrade.
//!
//! ## Lifecycle
//!
//! ```text
//! new_request ──► New ──put_gallery──► Published ──put_gallery──► Revision
//!                  │   (row deleted,      │   (row demoted,
//!                  │    new row inserted) │    token cleared,
//!           delete_request                │    new Published row inserted)
//!                  ▼                      ▼
//!               (gone)               Published (same token, views carried)
//! ```
//!
//! The demotion is a conditional update on `(id, token, state)`. If another
//! writer moved the row between the lookup and the update, zero rows match
//! and the transaction is abandoned with [`StoreError::Conflict`].
//!
//! The screenshot is written to the blob store inside the transaction's
//! scope but outside its atomicity: a failed insert leaves an orphaned,
//! content-addressed blob behind, which is harmless.

use crate::blob::{BlobError, BlobStore};
use crate::schema;
use crate::token::TokenMinter;
use crate::types::{EntryState, GalleryEntry, SortKey, view_subject};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// How long a writer waits on another process's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTRY_COLUMNS: &str = "id, parent, token, document, title, description, screenshot, \
                             author, license, views, modification_date, state";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown publish token")]
    UnknownToken,
    #[error("Gallery entry was modified concurrently")]
    Conflict,
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("Database schema version {0} is not a valid version")]
    SchemaInvalid(i64),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Result of [`PublishStore::record_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// First view of this lineage from this client; the counter moved.
    Counted,
    /// The client already viewed this lineage; nothing changed.
    Duplicate,
    /// No published row matches `(parent, id)`; nothing changed.
    UnknownEntry,
}

/// The row a token currently points at, as captured by `put_gallery`.
struct Current {
    id: i64,
    parent: i64,
    views: i64,
    state: EntryState,
}

/// Gallery rows plus the screenshot blobs they reference.
///
/// Thread-safe: the SQLite connection is behind a `Mutex`.
pub struct PublishStore {
    conn: Mutex<Connection>,
    screenshots: BlobStore,
    minter: TokenMinter,
}

impl PublishStore {
    /// Open the database at `db_path`, creating it and applying migrations.
    ///
    /// Migration failures are returned to the caller; the process should not
    /// continue on a partially-migrated schema.
    pub fn open(
        db_path: &Path,
        screenshots: BlobStore,
        minter: TokenMinter,
    ) -> Result<Self, StoreError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self::from_connection(conn, screenshots, minter)?;
        tracing::info!(database = %db_path.display(), "publish store opened");
        Ok(store)
    }

    /// Open a private in-memory database (tests, dry runs).
    pub fn open_in_memory(screenshots: BlobStore, minter: TokenMinter) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, screenshots, minter)
    }

    fn from_connection(
        mut conn: Connection,
        screenshots: BlobStore,
        minter: TokenMinter,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            screenshots,
            minter,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn screenshots(&self) -> &BlobStore {
        &self.screenshots
    }

    /// Length the next minted token will have.
    pub fn token_length(&self) -> usize {
        self.minter.length()
    }

    /// Reserve a fresh publish token as a `New` row.
    ///
    /// Token collisions are retried (growing the token length as needed);
    /// every other database error aborts.
    pub fn new_request(&self) -> Result<String, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();

        let token = self.minter.mint(|token| {
            match conn.execute(
                "INSERT INTO gallery (token, state, modification_date) VALUES (?1, ?2, ?3)",
                params![token, EntryState::New, now],
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_unique_violation(&e) => Ok(false),
                Err(e) => {
                    tracing::error!(error = %e, "failed to reserve publish token");
                    Err(StoreError::from(e))
                }
            }
        })?;

        tracing::debug!(length = token.len(), "publish token reserved");
        Ok(token)
    }

    /// Release an unused reservation. Returns whether a `New` row was removed.
    ///
    /// Tokens of published entries are left alone.
    pub fn delete_request(&self, token: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM gallery WHERE token = ?1 AND state = ?2",
            params![token, EntryState::New],
        )?;
        Ok(removed > 0)
    }

    /// Publish `entry` under its token, storing `screenshot` alongside.
    ///
    /// `entry.token` and the content fields (`document`, `title`,
    /// `description`, `author`, `license`) are taken from the caller; `id`,
    /// `parent`, `views`, `screenshot`, `modification_date` and `state` are
    /// assigned here and returned in the published entry.
    pub fn put_gallery(
        &self,
        mut entry: GalleryEntry,
        screenshot: &[u8],
    ) -> Result<GalleryEntry, StoreError> {
        let token = entry.token.clone().ok_or(StoreError::UnknownToken)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = tx
            .query_row(
                "SELECT id, parent, views, state FROM gallery WHERE token = ?1",
                params![token],
                |row| {
                    Ok(Current {
                        id: row.get(0)?,
                        parent: row.get(1)?,
                        views: row.get(2)?,
                        state: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::UnknownToken)?;

        let parent = match current.state {
            EntryState::New => {
                let removed = tx.execute(
                    "DELETE FROM gallery WHERE id = ?1 AND token = ?2 AND state = ?3",
                    params![current.id, token, EntryState::New],
                )?;
                if removed != 1 {
                    return Err(StoreError::Conflict);
                }
                0
            }
            EntryState::Published => {
                let demoted = tx.execute(
                    "UPDATE gallery SET state = ?1, token = NULL
                     WHERE id = ?2 AND token = ?3 AND state = ?4",
                    params![
                        EntryState::Revision,
                        current.id,
                        token,
                        EntryState::Published
                    ],
                )?;
                if demoted != 1 {
                    tracing::warn!(id = current.id, "demotion lost a concurrent update");
                    return Err(StoreError::Conflict);
                }
                view_subject(current.parent, current.id)
            }
            EntryState::Revision | EntryState::Deleted => return Err(StoreError::Conflict),
        };

        let screenshot_digest = self.screenshots.store(screenshot)?;

        entry.parent = parent;
        entry.views = current.views;
        entry.screenshot = screenshot_digest.to_string();
        entry.modification_date = Utc::now();
        entry.state = EntryState::Published;

        tx.execute(
            "INSERT INTO gallery (
                parent, token, document, title, description, screenshot,
                author, license, views, modification_date, state
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.parent,
                token,
                entry.document,
                entry.title,
                entry.description,
                entry.screenshot,
                entry.author,
                entry.license,
                entry.views,
                entry.modification_date,
                entry.state,
            ],
        )?;
        entry.id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(
            id = entry.id,
            parent = entry.parent,
            revision = current.state == EntryState::Published,
            document = %entry.document,
            "gallery entry published"
        );
        Ok(entry)
    }

    /// One page of published entries.
    ///
    /// Descending by `sort` (ties broken by id) unless `reversed`. A page
    /// holds at most `page_size` rows; clamping it is up to the caller.
    pub fn gallery(
        &self,
        page: u32,
        page_size: u32,
        sort: SortKey,
        reversed: bool,
    ) -> Result<Vec<GalleryEntry>, StoreError> {
        let direction = if reversed { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM gallery WHERE state = ?1
             ORDER BY {column} {direction}, id {direction}
             LIMIT ?2 OFFSET ?3",
            column = sort.column(),
        );
        let offset = i64::try_from(u64::from(page) * u64::from(page_size)).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![EntryState::Published, i64::from(page_size), offset],
            entry_from_row,
        )?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Count a view of the entry `(parent, id)` from the client `ip_hash`.
    ///
    /// Views are deduplicated per lineage subject (the root id). The counter
    /// only moves when the view record is new. Only published rows are
    /// countable: a repeat view, or a view of an unknown, reserved or
    /// superseded entry, leaves both tables unchanged.
    pub fn record_view(
        &self,
        parent: i64,
        id: i64,
        ip_hash: &str,
    ) -> Result<ViewOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let subject = view_subject(parent, id);

        match tx.execute(
            "INSERT INTO views (subject, ip_hash) VALUES (?1, ?2)",
            params![subject, ip_hash],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(subject, "repeat view ignored");
                return Ok(ViewOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let updated = tx.execute(
            "UPDATE gallery SET views = views + 1
             WHERE parent = ?1 AND id = ?2 AND state = ?3",
            params![parent, id, EntryState::Published],
        )?;
        if updated == 0 {
            return Ok(ViewOutcome::UnknownEntry);
        }

        tx.commit()?;
        Ok(ViewOutcome::Counted)
    }

    /// The row currently holding `token`, if any.
    pub fn entry_by_token(&self, token: &str) -> Result<Option<GalleryEntry>, StoreError> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM gallery WHERE token = ?1"),
                params![token],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// A lineage root and all rows descending from it, oldest first.
    pub fn lineage(&self, root: i64) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM gallery WHERE id = ?1 OR parent = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![root], entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<GalleryEntry> {
    Ok(GalleryEntry {
        id: row.get("id")?,
        parent: row.get("parent")?,
        token: row.get("token")?,
        document: row.get::<_, Option<String>>("document")?.unwrap_or_default(),
        title: row.get::<_, Option<String>>("title")?.unwrap_or_default(),
        description: row
            .get::<_, Option<String>>("description")?
            .unwrap_or_default(),
        screenshot: row.get::<_, Option<String>>("screenshot")?.unwrap_or_default(),
        author: row.get::<_, Option<String>>("author")?.unwrap_or_default(),
        license: row.get::<_, Option<String>>("license")?.unwrap_or_default(),
        views: row.get("views")?,
        modification_date: row.get("modification_date")?,
        state: row.get("state")?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
