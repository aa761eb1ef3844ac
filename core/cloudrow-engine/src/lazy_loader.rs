//! Bounded-retry executor.
//!
//! Runs a batch of re-invocable tasks concurrently, keeps the ones that
//! failed and runs them again, until either none are left or a whole round
//! fails. This is how implicit ordering between resource types resolves
//! itself: a task that needs another resource to exist first just fails
//! until that resource's own task has succeeded.

use crate::error::{StallError, TaskFailure};
use cloudrow_model::CrudResult;
use futures::future::{BoxFuture, join_all};
use std::fmt;
use std::future::Future;
use tracing::debug;

type Thunk<'a> = Box<dyn Fn() -> BoxFuture<'a, CrudResult<()>> + Send + Sync + 'a>;

/// A labelled, zero-argument task that can be started again from scratch.
pub struct Task<'a> {
    label: String,
    thunk: Thunk<'a>,
}

impl<'a> Task<'a> {
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = CrudResult<()>> + Send + 'a,
    {
        Self {
            label: label.into(),
            thunk: Box::new(move || Box::pin(f())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderReport {
    pub rounds: usize,
    pub succeeded: usize,
}

/// Runs `tasks` to completion.
///
/// Every round starts all remaining tasks together and waits for each of
/// them to settle. Failed tasks go into the next round. A round in which
/// nothing succeeded ends the run with a [`StallError`].
pub async fn run(tasks: Vec<Task<'_>>) -> Result<LoaderReport, StallError> {
    let mut remaining = tasks;
    let mut report = LoaderReport::default();

    while !remaining.is_empty() {
        report.rounds += 1;
        let attempted = remaining.len();
        let outcomes = join_all(remaining.iter().map(|task| (task.thunk)())).await;

        let mut failed = Vec::new();
        let mut failures = Vec::new();
        for (task, outcome) in remaining.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    failures.push(TaskFailure {
                        label: task.label.clone(),
                        message: format!("{e:#}"),
                    });
                    failed.push(task);
                }
            }
        }

        debug!(
            "Round {}: {} attempted, {} failed",
            report.rounds,
            attempted,
            failed.len()
        );

        if failed.len() == attempted {
            return Err(StallError {
                remaining: failed.len(),
                failures,
                rounds: report.rounds,
            });
        }
        remaining = failed;
    }

    Ok(report)
}
