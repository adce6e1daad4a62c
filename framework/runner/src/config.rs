use std::time::Duration;

use crate::cli::HarnessCli;
use crate::dispatcher::DEFAULT_FANOUT_FACTOR;

/// Tunables for the orchestrator. Defaults match an interactive deployment; tests flip
/// `test_mode` to skip the settle delay and shrink the poll intervals.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delete created courses and exams once a run reaches a terminal state.
    pub cleanup_enabled: bool,
    /// Skip the settle delay. Intended for harness development, not for measurements.
    pub test_mode: bool,
    pub no_progress: bool,
    /// Wait after rewriting the exam start date, so downstream systems catch up before load hits.
    pub settle_delay: Duration,
    pub preparation_poll_interval: Duration,
    /// Wait between cancelling queued build jobs and deleting the exam or course.
    pub cleanup_grace: Duration,
    /// Poll interval of the build-queue watcher used when cleanup is disabled.
    pub build_watch_interval: Duration,
    pub fanout_factor: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            test_mode: false,
            no_progress: false,
            settle_delay: Duration::from_secs(30),
            preparation_poll_interval: Duration::from_secs(1),
            cleanup_grace: Duration::from_secs(10),
            build_watch_interval: Duration::from_secs(10),
            fanout_factor: DEFAULT_FANOUT_FACTOR,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_cli(cli: &HarnessCli) -> Self {
        Self {
            cleanup_enabled: !cli.no_cleanup,
            test_mode: cli.test_mode,
            no_progress: cli.no_progress,
            ..Self::default()
        }
    }
}
