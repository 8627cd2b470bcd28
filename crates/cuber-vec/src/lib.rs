//! In-memory reference implementations of [`cuber_types::VectorStorage`],
//! [`cuber_types::KeywordStorage`], and [`cuber_types::ContentStorage`].
//!
//! The production engine lives in `cuber-sqlite`; this crate backs isolated unit tests
//! for code above the storage seam that don't need a file-backed Cube.

mod content_store;
mod keyword_store;
mod memory_vec;

pub use content_store::InMemoryContentStore;
pub use cuber_types::{
    Chunk, ContentStorage, Data, Document, KeywordStorage, StorageError, VecSearchHit,
    VectorStorage,
};
pub use keyword_store::InMemoryKeywordStore;
pub use memory_vec::InMemoryVecStore;
