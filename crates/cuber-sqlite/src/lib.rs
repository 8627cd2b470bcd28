//! SQLite-backed Storage Engine: one embedded database file per Cube, combining
//! the vector store and the labeled property graph behind the
//! `VectorStorage` / `GraphStorage` / `ContentStorage` / `KeywordStorage` traits.
//!
//! Schema creation is idempotent (`CREATE TABLE IF NOT EXISTS`); pre-existing tables are
//! tolerated so re-opening a Cube file never fails. Every public method takes its own
//! short-lived lock on the one shared [`rusqlite::Connection`] and wraps multi-statement
//! writes in a transaction, so every call is transactional on its own.

mod connection;
mod content;
mod graph;
mod keyword;
mod schema;
mod vector;

pub use connection::SqliteStore;

pub use cuber_types::{
    ContentStorage, GraphStorage, KeywordStorage, StorageError, VectorStorage,
};
