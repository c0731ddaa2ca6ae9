//! Storage engine for the global dictionary: three unique-constrained
//! string tables whose autoincrement row ids are the stable global ids.
//!
//! Merge semantics are insert-or-ignore: the first writer of a value wins
//! its id, later duplicates are no-ops, and an id once issued is never
//! reassigned or reused. Every merge inserts all three category batches
//! inside one transaction, so a failed upload leaves no partial state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use protocol::{
    CATEGORY_FILES, CATEGORY_TEMPLATES, CATEGORY_VARIABLES, DictionaryUpload, GlobalDictionary,
};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dictionary database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("dictionary store mutex poisoned")]
    Poisoned,
    #[error("failed persisting snapshot '{path}': {source}")]
    SnapshotIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed encoding snapshot: {0}")]
    SnapshotEncode(#[from] serde_json::Error),
}

// (table, value column) per category, in upload order.
const TABLES: [(&str, &str); 3] = [
    (CATEGORY_TEMPLATES, "template"),
    (CATEGORY_VARIABLES, "value"),
    (CATEGORY_FILES, "filename"),
];

pub struct DictionaryStore {
    conn: Mutex<Connection>,
}

impl DictionaryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Transient store for tests; same schema, no file.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        for (table, column) in TABLES {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} \
                     (id INTEGER PRIMARY KEY AUTOINCREMENT, {column} TEXT UNIQUE)"
                ),
                [],
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts all three category batches atomically, then returns the full
    /// current mapping (every value ever stored, from any uploader).
    pub fn merge(&self, upload: &DictionaryUpload) -> Result<GlobalDictionary, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        insert_batch(&tx, CATEGORY_TEMPLATES, "template", &upload.templates)?;
        insert_batch(&tx, CATEGORY_VARIABLES, "value", &upload.variables)?;
        insert_batch(&tx, CATEGORY_FILES, "filename", &upload.files)?;
        tx.commit()?;
        debug!(
            templates = upload.templates.len(),
            variables = upload.variables.len(),
            files = upload.files.len(),
            "merged dictionary upload"
        );
        read_snapshot(&conn)
    }

    /// The read-back step alone, for out-of-band inspection.
    pub fn snapshot(&self) -> Result<GlobalDictionary, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        read_snapshot(&conn)
    }
}

fn insert_batch(
    conn: &Connection,
    table: &str,
    column: &str,
    values: &[String],
) -> Result<(), StoreError> {
    let mut stmt =
        conn.prepare(&format!("INSERT OR IGNORE INTO {table} ({column}) VALUES (?1)"))?;
    for value in values {
        stmt.execute(params![value])?;
    }
    Ok(())
}

fn read_snapshot(conn: &Connection) -> Result<GlobalDictionary, StoreError> {
    let mut snapshot = GlobalDictionary::new();
    for (table, column) in TABLES {
        let mut stmt = conn.prepare(&format!("SELECT id, {column} FROM {table}"))?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((value, id))
        })?;
        let mut mapping = BTreeMap::new();
        for row in rows {
            let (value, id) = row?;
            mapping.insert(value, id);
        }
        snapshot.insert(table.to_string(), mapping);
    }
    Ok(snapshot)
}

/// Writes the snapshot as JSON to the configured side file. Both the
/// dictionary service and the workers persist this file so codec pass 2
/// can read confirmed ids from disk.
pub fn persist_snapshot(path: impl AsRef<Path>, snapshot: &GlobalDictionary) -> Result<(), StoreError> {
    let path = path.as_ref();
    let rendered = serde_json::to_vec(snapshot)?;
    std::fs::write(path, rendered).map_err(|source| StoreError::SnapshotIo {
        path: path.display().to_string(),
        source,
    })
}
