use std::future::Future;

use anyhow::Context;
use cohort_core::prelude::{DelegatedCancelListener, RunCancelledError};

/// Owns the async runtime backing the dispatcher and the orchestrator's interruptible waits.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    pub fn new() -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        Ok(Self { runtime })
    }

    /// Run async code in place, blocking until it completes or the run is cancelled.
    ///
    /// Note that the future is dropped on cancellation. Submitting a future which does not
    /// support cancelling may delay the CANCELLED transition until it next yields.
    pub fn execute_in_place<T>(
        &self,
        mut cancel: DelegatedCancelListener,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = cancel.wait_for_cancel() => {
                    Err(anyhow::anyhow!(RunCancelledError::default()))
                },
            }
        })
    }

    /// Sleep that returns early with a [RunCancelledError] when the run is cancelled.
    pub fn interruptible_sleep(
        &self,
        duration: std::time::Duration,
        cancel: DelegatedCancelListener,
    ) -> anyhow::Result<()> {
        self.execute_in_place(cancel, async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    pub(crate) fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }
}
