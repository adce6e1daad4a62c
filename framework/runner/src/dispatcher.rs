use std::sync::Arc;

use cohort_core::prelude::{DelegatedCancelListener, ParticipantBailError};
use cohort_instruments::RequestSample;
use futures::future::join_all;
use indicatif::ProgressBar;
use tokio::sync::Semaphore;

use crate::executor::Executor;

/// One independent unit of work inside a fan-out phase, typically a single participant's calls.
pub type UnitOfWork = Box<dyn FnOnce() -> anyhow::Result<Vec<RequestSample>> + Send + 'static>;

/// Fan-out factor used for registration and exam-participation phases: workers per available
/// core, before capping at the task count.
pub const DEFAULT_FANOUT_FACTOR: usize = 10;

/// The worker pool size for a phase: `available_parallelism * factor`, capped at the number of
/// tasks and never below one.
pub fn concurrency_limit(task_count: usize, factor: usize) -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);

    (parallelism * factor).min(task_count).max(1)
}

/// Run every task on a bounded worker pool and flatten their samples into one collection.
///
/// Tasks are isolated: a failing or panicking task is logged and contributes zero samples,
/// and never aborts its siblings. Ordering across tasks is not guaranteed, only completeness
/// of the non-failing contributions. The pool is fully drained before this returns.
///
/// If the run is already cancelled this returns immediately with an empty result. Cancellation
/// raised during execution skips tasks that have not started and returns whatever the finished
/// tasks collected; in-flight tasks are not torn down forcibly.
pub fn run_all(
    executor: &Executor,
    label: &str,
    tasks: Vec<UnitOfWork>,
    factor: usize,
    mut cancel: DelegatedCancelListener,
    progress: Option<ProgressBar>,
) -> Vec<RequestSample> {
    if tasks.is_empty() {
        return Vec::new();
    }
    if cancel.should_cancel() {
        log::debug!("Not dispatching phase [{label}], run is already cancelled");
        return Vec::new();
    }

    let limit = concurrency_limit(tasks.len(), factor);
    log::debug!(
        "Dispatching {} tasks for phase [{label}] across {limit} workers",
        tasks.len()
    );

    let semaphore = Arc::new(Semaphore::new(limit));

    let samples = executor.block_on(async {
        let mut handles = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let mut cancel = cancel.clone();
            let progress = progress.clone();
            let label = label.to_string();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                if cancel.should_cancel() {
                    return Vec::new();
                }

                let result = tokio::task::spawn_blocking(task).await;
                if let Some(progress) = &progress {
                    progress.inc(1);
                }

                match result {
                    Ok(Ok(samples)) => samples,
                    Ok(Err(e)) if e.is::<ParticipantBailError>() => {
                        log::debug!("Task {index} bailed out of phase [{label}]: {e}");
                        Vec::new()
                    }
                    Ok(Err(e)) => {
                        log::warn!("Task {index} failed in phase [{label}]: {e:?}");
                        Vec::new()
                    }
                    Err(e) => {
                        log::error!("Task {index} panicked in phase [{label}]: {e:?}");
                        Vec::new()
                    }
                }
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.ok())
            .flatten()
            .collect()
    });

    if let Some(progress) = &progress {
        progress.finish_and_clear();
    }

    samples
}
