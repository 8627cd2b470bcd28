//! In-memory reference implementation of [`cuber_types::GraphStorage`].
//!
//! The production engine lives in `cuber-sqlite`; this crate backs isolated unit tests
//! for code above the storage seam (Absorb, Query, Memify) that don't need a file-backed
//! Cube.

mod memory;

pub use memory::InMemoryGraphStore;
pub use cuber_types::{GraphEdge, GraphNode, GraphStorage, NodeType, StorageError, Triple};
