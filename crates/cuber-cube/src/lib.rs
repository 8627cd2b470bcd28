//! Absorb, Query, and Memify engines for one Cube.
//!
//! Every type here is generic over the storage/provider trait objects from
//! `cuber-types`; `cuber-service` wires concrete `cuber-sqlite`/`cuber-provider`
//! implementations into these engines per Cube.

mod absorb;
mod chunk;
mod extract;
mod json_sanitize;
mod memify;
mod query;
mod render;
mod store;

pub use absorb::{AbsorbEngine, AbsorbError, AbsorbOutcome, AbsorbRequest};
pub use chunk::{chunk_text, ChunkError, ChunkInput, MIN_CHUNK_SIZE};
pub use extract::{
    run_extract, ChunkExtraction, ExtractError, GraphExtractOutput, UnknownCandidate,
    EXTRACT_CONCURRENCY,
};
pub use memify::{run_meta_cognition, run_phase_b, MemifyConfig, MemifyOutcome, MetaCognitionOutcome};
pub use query::QueryEngine;
pub use render::{render_triple, render_triples};
pub use store::{run_store, StoreError, StoreOutput};
