//! Gallery row types shared by the publish store, the service layer and the CLI.
//!
//! [`GalleryEntry`] serializes to the JSON shape the playground front-end
//! consumes; the publishing token and lifecycle state never leave the server.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a gallery row, persisted as an integer code.
///
/// `New` rows are token reservations with no content. Exactly one row per
/// lineage is `Published`; superseded versions become `Revision`. Rows never
/// leave `Revision` or `Deleted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EntryState {
    #[default]
    New,
    Published,
    Revision,
    Deleted,
}

impl EntryState {
    pub fn code(self) -> i64 {
        match self {
            EntryState::New => 0,
            EntryState::Published => 1,
            EntryState::Revision => 2,
            EntryState::Deleted => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EntryState::New),
            1 => Some(EntryState::Published),
            2 => Some(EntryState::Revision),
            3 => Some(EntryState::Deleted),
            _ => None,
        }
    }
}

impl ToSql for EntryState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for EntryState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        EntryState::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

/// One row of the gallery table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub id: i64,
    /// Id of the lineage root, or 0 when this row is itself a root.
    pub parent: i64,
    #[serde(skip)]
    pub token: Option<String>,
    /// Digest of the document JSON in the documents blob store.
    pub document: String,
    pub title: String,
    pub description: String,
    /// Digest of the PNG in the screenshots blob store.
    pub screenshot: String,
    pub author: String,
    pub license: String,
    pub views: i64,
    pub modification_date: DateTime<Utc>,
    #[serde(skip)]
    pub state: EntryState,
}

impl GalleryEntry {
    /// The id views are deduplicated against: the lineage root.
    pub fn subject_id(&self) -> i64 {
        view_subject(self.parent, self.id)
    }
}

/// Views are counted per lineage, so revisions share their root's subject.
pub fn view_subject(parent: i64, id: i64) -> i64 {
    if parent > 0 { parent } else { id }
}

/// Ordering for gallery listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Newest,
    Views,
}

impl SortKey {
    /// Parse a query parameter; anything but `views` means newest first.
    pub fn from_param(param: &str) -> Self {
        if param == "views" {
            SortKey::Views
        } else {
            SortKey::Newest
        }
    }

    pub(crate) fn column(self) -> &'static str {
        match self {
            SortKey::Newest => "modification_date",
            SortKey::Views => "views",
        }
    }
}
