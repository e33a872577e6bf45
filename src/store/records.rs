//! Image records persisted in SQLite.
//!
//! The table mirrors what the upload and labeling flows write: one row per
//! stored image, with an optional model prediction and an optional
//! human-confirmed label. Only `human_label` is ever used for training.

use std::fmt;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    original_name TEXT,
    predicted_label TEXT,
    confidence REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    human_label TEXT,
    created_at TEXT NOT NULL
)";

/// Review state of a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Labeled,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Labeled => "labeled",
            RecordStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `image` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub file_path: String,
    pub original_name: Option<String>,
    pub predicted_label: Option<String>,
    pub confidence: Option<f64>,
    /// Stored verbatim; anything other than the known states is kept as-is.
    pub status: String,
    pub human_label: Option<String>,
    pub created_at: String,
}

/// Values for a new row.
#[derive(Debug, Clone)]
pub struct NewImageRecord {
    pub file_path: String,
    pub original_name: Option<String>,
    pub status: RecordStatus,
    pub human_label: Option<String>,
}

/// Read access the training pipeline needs from the record store.
pub trait RecordStore {
    /// Rows whose status is `labeled` and whose human label is not NULL,
    /// in insertion order.
    fn labeled_records(&self) -> Result<Vec<ImageRecord>>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ClassifierError::io(parent, e))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    pub fn insert(&self, record: &NewImageRecord) -> Result<i64> {
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO image (file_path, original_name, status, human_label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.file_path,
                record.original_name,
                record.status.as_str(),
                record.human_label,
                created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record a human decision for an image. Returns `false` if no row matched.
    pub fn set_human_label(&self, id: i64, label: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE image SET human_label = ?2, status = ?3 WHERE id = ?1",
            params![id, label, RecordStatus::Labeled.as_str()],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, id: i64) -> Result<Option<ImageRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, file_path, original_name, predicted_label, confidence,
                        status, human_label, created_at
                 FROM image WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

impl RecordStore for SqliteRecordStore {
    fn labeled_records(&self) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_path, original_name, predicted_label, confidence,
                    status, human_label, created_at
             FROM image
             WHERE status = ?1 AND human_label IS NOT NULL
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![RecordStatus::Labeled.as_str()], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        original_name: row.get(2)?,
        predicted_label: row.get(3)?,
        confidence: row.get(4)?,
        status: row.get(5)?,
        human_label: row.get(6)?,
        created_at: row.get(7)?,
    })
}
