//! The `Task` contract and an adapter so ordinary async functions can implement it
//! without each call site hand-writing `Any` downcasts.

use async_trait::async_trait;
use cuber_types::{PipelineError, TokenUsage};
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// One stage of a [`crate::Pipeline`]. Input and output are opaque (`Box<dyn Any>`) so
/// a pipeline can chain stages whose concrete types differ stage to stage; each task
/// downcasts its own input and boxes its own output.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable name used in error messages and tracing spans.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        input: Box<dyn Any + Send>,
        cancel: &CancellationToken,
    ) -> Result<(Box<dyn Any + Send>, TokenUsage), PipelineError>;
}

/// Wraps a typed async closure `Fn(I, CancellationToken) -> Future<Output = Result<(O, TokenUsage), PipelineError>>`
/// as a [`Task`], handling the `Any` downcast/upcast at the boundary.
pub struct FnTask<I, O, F> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> FnTask<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(O, TokenUsage), PipelineError>> + Send,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> Task for FnTask<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(O, TokenUsage), PipelineError>> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        input: Box<dyn Any + Send>,
        cancel: &CancellationToken,
    ) -> Result<(Box<dyn Any + Send>, TokenUsage), PipelineError> {
        let typed_input = *input
            .downcast::<I>()
            .map_err(|_| PipelineError::TypeMismatch { task: self.name })?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { task: self.name });
        }
        let (output, usage) = (self.f)(typed_input, cancel.clone()).await?;
        Ok((Box::new(output), usage))
    }
}
