//! Shared error taxonomy. Every crate owns one `thiserror` enum at the seam it is
//! responsible for; higher layers wire them together with `#[from]` rather than
//! `.map_err` at every call site.

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("edge endpoints not found: {0} -> {1}")]
    EdgeEndpointsNotFound(String, String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned malformed response: {0}")]
    MalformedResponse(String),
    #[error("empty response")]
    EmptyResponse,
    #[error("unknown provider family: {0}")]
    UnknownFamily(String),
    #[error("embedding dimension mismatch: configured {configured}, model returned {returned}")]
    EmbeddingDimensionMismatch { configured: u32, returned: u32 },
    #[error("provider call cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("task {task} failed: {source}")]
    TaskFailed {
        task: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("task {task} produced or expected a mismatched input/output type")]
    TypeMismatch { task: &'static str },
    #[error("pipeline cancelled during task {task}")]
    Cancelled { task: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("permission: {0}")]
    Permission(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, thiserror::Error)]
pub enum MemifyError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("malformed verdict response: {0}")]
    MalformedVerdict(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("authorization: {0}")]
    Authorization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("key already burned: {0}")]
    KeyAlreadyBurned(String),
    #[error("signature invalid")]
    InvalidSignature,
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authorization: {0}")]
    Authorization(String),
    #[error("permission: {0}")]
    Permission(String),
    #[error("resource: {0}")]
    Resource(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("query: {0}")]
    Query(#[from] QueryError),
    #[error("memify: {0}")]
    Memify(#[from] MemifyError),
    #[error("lifecycle: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}
