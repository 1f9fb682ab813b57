// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Fan-out/fan-in barrier for the tasks of one phase.
//!
//! Every task of a phase is spawned at once and the phase only returns after
//! each of them has reported. A failing task does not cancel its siblings:
//! half-started external resources are left to finish before the phase
//! reports upward.

use crate::error::{PhaseError, ProvisionError, Result, TaskFailure};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tokio::time::Instant;
use tracing::{error, info, info_span, instrument, Instrument};

/// A named unit of concurrent work within a phase
pub struct Task<T> {
    name: String,
    future: BoxFuture<'static, Result<T>>,
}

impl<T> Task<T> {
    pub fn new<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            future: future.boxed(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of one task
#[derive(Debug)]
pub struct TaskResult<T> {
    pub task: String,
    pub outcome: Result<T>,
}

impl<T> TaskResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run every task concurrently and wait for all of them.
///
/// Returns exactly one result per task, in the order the tasks were given.
/// A task that panics is reported as failed rather than dropped.
#[instrument(skip(tasks), fields(tasks = tasks.len()))]
pub async fn collect_phase<T>(phase: &str, tasks: Vec<Task<T>>) -> Vec<TaskResult<T>>
where
    T: Send + 'static,
{
    let (names, handles): (Vec<String>, Vec<_>) = tasks
        .into_iter()
        .map(|task| {
            let span = info_span!("task", task = %task.name);
            let future = task.future;
            let handle = tokio::spawn(
                async move {
                    let started = Instant::now();
                    let outcome = future.await;
                    match &outcome {
                        Ok(_) => info!(elapsed = ?started.elapsed(), "Task completed"),
                        Err(e) => error!(elapsed = ?started.elapsed(), "Task failed: {}", e),
                    }
                    outcome
                }
                .instrument(span),
            );
            (task.name, handle)
        })
        .unzip();

    join_all(handles)
        .await
        .into_iter()
        .zip(names)
        .map(|(joined, task)| {
            let outcome = joined.unwrap_or_else(|e| {
                Err(ProvisionError::TaskAborted {
                    task: task.clone(),
                    message: e.to_string(),
                })
            });
            TaskResult { task, outcome }
        })
        .collect()
}

/// Run a phase and fold its results: all artifacts on success, otherwise a
/// `PhaseError` carrying every failed task.
pub async fn run_phase<T>(phase: &str, tasks: Vec<Task<T>>) -> std::result::Result<Vec<T>, PhaseError>
where
    T: Send + 'static,
{
    let started = Instant::now();
    info!(phase = %phase, "Starting phase with {} task(s)", tasks.len());

    let results = collect_phase(phase, tasks).await;
    let folded = fold_results(phase, results);

    match &folded {
        Ok(_) => info!(phase = %phase, elapsed = ?started.elapsed(), "Phase complete"),
        Err(e) => error!(phase = %phase, elapsed = ?started.elapsed(), "{}", e),
    }
    folded
}

/// Split a result set into artifacts, or a composite error if any task failed
pub fn fold_results<T>(
    phase: &str,
    results: Vec<TaskResult<T>>,
) -> std::result::Result<Vec<T>, PhaseError> {
    let total = results.len();
    let mut artifacts = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for result in results {
        match result.outcome {
            Ok(artifact) => artifacts.push(artifact),
            Err(error) => failures.push(TaskFailure {
                task: result.task,
                error,
            }),
        }
    }

    if failures.is_empty() {
        Ok(artifacts)
    } else {
        Err(PhaseError {
            phase: phase.to_string(),
            total,
            failures,
        })
    }
}
