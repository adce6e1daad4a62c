use chrono::{DateTime, Utc};
use cohort_instruments::RequestSample;
use std::sync::Arc;

use crate::model::{Credentials, SimulationDefinition};

/// Per-student exam preparation progress, as reported by the target system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreparationStatus {
    pub finished: u64,
    pub failed: u64,
    pub overall: u64,
}

impl PreparationStatus {
    pub fn is_done(&self) -> bool {
        self.finished + self.failed >= self.overall
    }
}

/// Administrative capabilities against the target system, implemented by a transport adapter
/// for the target's actual HTTP protocol.
///
/// All calls block on I/O; implementations must be safe to call from multiple workers at once.
pub trait AdminActions: Send + Sync {
    fn login(&self) -> anyhow::Result<()>;

    /// Create a fresh course and return its identifier.
    fn create_course(&self) -> anyhow::Result<String>;

    /// Verify that an existing course is reachable with this actor's rights.
    fn get_course(&self, course_id: &str) -> anyhow::Result<()>;

    fn delete_course(&self, course_id: &str) -> anyhow::Result<()>;

    /// Create a fresh exam on the course and return its identifier.
    fn create_exam(&self, course_id: &str) -> anyhow::Result<String>;

    /// Create the exam's exercise groups and exercises.
    fn create_exam_exercises(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    fn delete_exam(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    /// Register one participant for the course. Called once per participant from a fan-out
    /// phase; a failure skips that participant and never aborts the others.
    fn register_participant(&self, course_id: &str, username: &str) -> anyhow::Result<()>;

    /// Register every course participant for the exam in one call.
    fn register_participants_for_exam(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    /// Create the benchmarking-only side exercise used to generate auxiliary traffic.
    fn create_side_exercise(&self, course_id: &str) -> anyhow::Result<String>;

    fn fetch_exam(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    fn update_exam_dates(
        &self,
        course_id: &str,
        exam_id: &str,
        visible_from: DateTime<Utc>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Generate the per-student exams.
    fn generate_student_exams(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    /// Trigger exercise-repository provisioning for all generated student exams.
    fn start_exercise_provisioning(&self, course_id: &str, exam_id: &str) -> anyhow::Result<()>;

    fn preparation_status(&self, course_id: &str, exam_id: &str)
        -> anyhow::Result<PreparationStatus>;

    fn cancel_queued_build_jobs(&self) -> anyhow::Result<()>;

    fn cancel_running_build_jobs(&self) -> anyhow::Result<()>;

    fn build_queue_size(&self, course_id: &str) -> anyhow::Result<u64>;
}

/// One simulated end-user session driving the exam UI's call sequence against the target.
///
/// Every call returns the request samples it observed. Implementations dispatch exhaustively on
/// the [crate::model::ExerciseKind] assigned to them; programming exercises run repeated
/// commit+push rounds, with a small bounded retry-with-delay on transient clone failures.
/// Exhausting those retries should surface as a
/// [cohort_core::prelude::ParticipantBailError] so the run continues without this participant.
pub trait ParticipantActions: Send + Sync {
    fn username(&self) -> &str;

    fn login(&self) -> anyhow::Result<Vec<RequestSample>>;

    /// The miscellaneous calls a real client makes right after login.
    fn perform_startup_calls(&self) -> anyhow::Result<Vec<RequestSample>>;

    fn begin_exam_participation(
        &self,
        course_id: &str,
        exam_id: &str,
        side_exercise_id: Option<&str>,
    ) -> anyhow::Result<Vec<RequestSample>>;

    /// Solve and submit whatever exercises are assigned.
    fn participate_in_exam(
        &self,
        course_id: &str,
        exam_id: &str,
    ) -> anyhow::Result<Vec<RequestSample>>;

    fn submit_and_end_exam(
        &self,
        course_id: &str,
        exam_id: &str,
    ) -> anyhow::Result<Vec<RequestSample>>;
}

/// Produces the actors a run needs, bound to the definition's target system.
pub trait DriverFactory: Send + Sync {
    /// An admin actor backed by the managed credential pool.
    fn pool_admin(&self, definition: &SimulationDefinition) -> anyhow::Result<Arc<dyn AdminActions>>;

    /// An admin actor for operator-supplied credentials.
    fn admin_with_credentials(
        &self,
        definition: &SimulationDefinition,
        credentials: &Credentials,
    ) -> anyhow::Result<Arc<dyn AdminActions>>;

    /// One participant actor per index in the definition's participant range.
    fn participants(
        &self,
        definition: &SimulationDefinition,
    ) -> anyhow::Result<Vec<Arc<dyn ParticipantActions>>>;
}
