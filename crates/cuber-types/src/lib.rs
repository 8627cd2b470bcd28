//! Core domain types and storage/provider traits shared across the Cuber workspace.
//!
//! Every other crate in the workspace depends on this one for the data model, the
//! `GraphStorage`/`VectorStorage`/`Embedder`/`ChatProvider` trait contracts, and the
//! shared error taxonomy each crate's own error enum converts into.

mod domain;
mod error;
pub mod lifecycle;
mod query;
mod traits;

pub use domain::*;
pub use error::*;
pub use lifecycle::*;
pub use query::*;
pub use traits::*;
