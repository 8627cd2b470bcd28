//! Linear composition of typed `Task`s.
//!
//! Each task accepts an opaque input, produces an opaque output and a [`TokenUsage`]
//! delta. The runtime threads the output of task *i* into task *i+1*, accumulates usage,
//! and aborts the chain on the first error, returning the partial usage accrued so far.
//! Absorb is the sole consumer today: `[Chunk -> GraphExtract -> Store]`.

mod runtime;
mod task;

pub use cuber_types::{PipelineError, TokenUsage};
pub use runtime::{Pipeline, PipelineOutcome};
pub use task::{FnTask, Task};

pub use tokio_util::sync::CancellationToken;
