use crate::model::{LogEntry, Run};

/// Receives run lifecycle events for operator dashboards. How the events leave the process is
/// a transport concern; implementations must be cheap and must never block the caller for long.
pub trait RunObserver: Send + Sync {
    fn run_queued(&self, run: &Run);

    fn run_status_changed(&self, run: &Run);

    fn run_log_appended(&self, run_id: &str, entry: &LogEntry);

    /// The run finished and its aggregated stats are available.
    fn run_result_ready(&self, run: &Run);
}

/// Observer that discards every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn run_queued(&self, _run: &Run) {}

    fn run_status_changed(&self, _run: &Run) {}

    fn run_log_appended(&self, _run_id: &str, _entry: &LogEntry) {}

    fn run_result_ready(&self, _run: &Run) {}
}
