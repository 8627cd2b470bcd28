//! Sequential runner threading one task's output into the next.

use crate::task::Task;
use cuber_types::{PipelineError, TokenUsage};
use std::any::Any;
use tokio_util::sync::CancellationToken;

/// Outcome of running a [`Pipeline`] to completion or to the point of first failure.
/// `usage` always reflects everything accrued before an error — partial writes during
/// Absorb are never compensated, so the caller sees exactly what was spent.
pub struct PipelineOutcome<T> {
    pub result: Result<T, PipelineError>,
    pub usage: TokenUsage,
}

/// An ordered list of [`Task`]s run as `[Task1 -> Task2 -> ... -> TaskN]`.
pub struct Pipeline {
    tasks: Vec<Box<dyn Task>>,
}

impl Pipeline {
    pub fn new(tasks: Vec<Box<dyn Task>>) -> Self {
        Self { tasks }
    }

    /// Run every task in order. Stops at the first error and returns the usage
    /// accumulated up to and including the failing task's partial contribution.
    ///
    /// `O` must match the final task's boxed output type or this returns
    /// [`PipelineError::TypeMismatch`].
    pub async fn run<I, O>(&self, input: I, cancel: CancellationToken) -> PipelineOutcome<O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let mut usage = TokenUsage::default();
        let mut current: Box<dyn Any + Send> = Box::new(input);

        for task in &self.tasks {
            if cancel.is_cancelled() {
                return PipelineOutcome {
                    result: Err(PipelineError::Cancelled { task: task.name() }),
                    usage,
                };
            }
            match task.run(current, &cancel).await {
                Ok((output, delta)) => {
                    usage.add(delta);
                    current = output;
                }
                Err(err) => {
                    return PipelineOutcome {
                        result: Err(err),
                        usage,
                    };
                }
            }
        }

        match current.downcast::<O>() {
            Ok(boxed) => PipelineOutcome {
                result: Ok(*boxed),
                usage,
            },
            Err(_) => PipelineOutcome {
                result: Err(PipelineError::TypeMismatch { task: "<pipeline output>" }),
                usage,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnTask;

    #[tokio::test]
    async fn threads_output_and_accumulates_usage() {
        let double = FnTask::new("double", |input: i32, _cancel| async move {
            Ok((
                input * 2,
                TokenUsage {
                    input_tokens: 1,
                    output_tokens: 0,
                },
            ))
        });
        let stringify = FnTask::new("stringify", |input: i32, _cancel| async move {
            Ok((
                input.to_string(),
                TokenUsage {
                    input_tokens: 0,
                    output_tokens: 1,
                },
            ))
        });
        let pipeline = Pipeline::new(vec![Box::new(double), Box::new(stringify)]);
        let outcome: PipelineOutcome<String> =
            pipeline.run(21, CancellationToken::new()).await;
        assert_eq!(outcome.result.unwrap(), "42");
        assert_eq!(outcome.usage.input_tokens, 1);
        assert_eq!(outcome.usage.output_tokens, 1);
    }

    #[tokio::test]
    async fn aborts_on_first_error_with_partial_usage() {
        let ok_task = FnTask::new("ok", |input: i32, _cancel| async move {
            Ok((
                input,
                TokenUsage {
                    input_tokens: 5,
                    output_tokens: 0,
                },
            ))
        });
        let failing = FnTask::new("failing", |_input: i32, _cancel| async move {
            Err::<(i32, TokenUsage), PipelineError>(PipelineError::TaskFailed {
                task: "failing",
                source: "boom".into(),
            })
        });
        let never_runs = FnTask::new("never", |input: i32, _cancel| async move {
            Ok((
                input,
                TokenUsage {
                    input_tokens: 100,
                    output_tokens: 0,
                },
            ))
        });
        let pipeline = Pipeline::new(vec![
            Box::new(ok_task),
            Box::new(failing),
            Box::new(never_runs),
        ]);
        let outcome: PipelineOutcome<i32> = pipeline.run(1, CancellationToken::new()).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.usage.input_tokens, 5);
    }

    #[tokio::test]
    async fn cancellation_before_a_task_aborts_without_running_it() {
        let token = CancellationToken::new();
        token.cancel();
        let never_runs = FnTask::new("never", |input: i32, _cancel| async move {
            Ok((input, TokenUsage::default()))
        });
        let pipeline = Pipeline::new(vec![Box::new(never_runs)]);
        let outcome: PipelineOutcome<i32> = pipeline.run(1, token).await;
        assert!(matches!(
            outcome.result,
            Err(PipelineError::Cancelled { .. })
        ));
    }
}
