use chrono::{DateTime, Utc};

use crate::model::{LogEntry, Run, SimulationDefinition};
use crate::schedule::ScheduleRule;

/// Storage boundary for definitions, runs and schedules. The queue and orchestrator only ever
/// talk to this trait; the backing technology is a deployment concern.
///
/// Deletions are explicit and ordered by the caller (children before parent); implementations
/// must not rely on cascades.
pub trait Persistence: Send + Sync {
    fn save_definition(&self, definition: &SimulationDefinition) -> anyhow::Result<()>;

    fn definition(&self, id: &str) -> anyhow::Result<Option<SimulationDefinition>>;

    /// Persist the run, including status transitions and collected stats.
    fn save_run(&self, run: &Run) -> anyhow::Result<()>;

    fn run(&self, id: &str) -> anyhow::Result<Option<Run>>;

    /// Append one log entry to a run without rewriting the rest of it. Used by detached
    /// cleanup, which runs after the run has reached its terminal state.
    fn append_run_log(&self, run_id: &str, entry: &LogEntry) -> anyhow::Result<()>;

    /// All runs still in the QUEUED state, ordered by the time they were queued.
    fn queued_runs(&self) -> anyhow::Result<Vec<Run>>;

    fn save_schedule(&self, rule: &ScheduleRule) -> anyhow::Result<()>;

    /// All schedules whose next fire time is at or before `now`.
    fn due_schedules(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduleRule>>;

    fn delete_schedule_subscribers(&self, rule_id: &str) -> anyhow::Result<()>;

    fn delete_schedule(&self, rule_id: &str) -> anyhow::Result<()>;
}
