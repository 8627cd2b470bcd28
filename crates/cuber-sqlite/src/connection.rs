//! Connection lifecycle: open/create the per-Cube file, declare schema, and expose the
//! `with_conn` helper every trait impl funnels through.

use crate::schema::SCHEMA_SQL;
use cuber_types::StorageError;
use std::path::Path;
use std::sync::Mutex;

/// One Cube's unified vector + graph store, the per-Cube storage handle. Callers
/// serialize access to it at a layer above this one (Absorb/Memify/Delete exclusive,
/// Query/Stats shared) — here every call just takes the lock for the duration of one
/// statement or transaction.
pub struct SqliteStore {
    pub(crate) conn: Mutex<rusqlite::Connection>,
    pub(crate) embedding_dimension: u32,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and declare the schema. Schema
    /// creation is idempotent; pre-existing tables are tolerated.
    pub fn open(path: impl AsRef<Path>, embedding_dimension: u32) -> Result<Self, StorageError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| StorageError::Backend(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::Backend(format!("pragma: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StorageError::Backend(format!("pragma: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StorageError::Backend(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedding_dimension,
        })
    }

    /// In-memory database, for tests that want the real SQL dialect without a file.
    pub fn open_in_memory(embedding_dimension: u32) -> Result<Self, StorageError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StorageError::Backend(format!("open: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StorageError::Backend(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedding_dimension,
        })
    }

    /// Run `f` against the shared connection, translating both lock poisoning and
    /// `rusqlite::Error` into [`StorageError::Backend`].
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("poisoned lock: {e}")))?;
        f(&conn).map_err(|e| StorageError::Backend(e.to_string()))
    }

    pub fn embedding_dimension(&self) -> u32 {
        self.embedding_dimension
    }
}

pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
