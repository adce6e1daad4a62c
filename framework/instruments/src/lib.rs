mod report;
mod stats;

pub use report::print_summary;
pub use stats::{aggregate, CategoryStats, RunStats, TimeBucket};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The closed set of request categories observed during a run.
///
/// Clone and push traffic is split by the authentication mechanism the participant was assigned,
/// so that a run configured with a mechanism mix shows how each transport held up. Every category
/// is present in aggregated output, with a zero count when it was never used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestCategory {
    Authentication,
    Misc,
    GetStudentExam,
    StartStudentExam,
    SubmitExercise,
    SubmitStudentExam,
    CloneSsh,
    CloneToken,
    ClonePassword,
    PushSsh,
    PushToken,
    PushPassword,
}

impl RequestCategory {
    pub const ALL: [RequestCategory; 12] = [
        RequestCategory::Authentication,
        RequestCategory::Misc,
        RequestCategory::GetStudentExam,
        RequestCategory::StartStudentExam,
        RequestCategory::SubmitExercise,
        RequestCategory::SubmitStudentExam,
        RequestCategory::CloneSsh,
        RequestCategory::CloneToken,
        RequestCategory::ClonePassword,
        RequestCategory::PushSsh,
        RequestCategory::PushToken,
        RequestCategory::PushPassword,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RequestCategory::Authentication => "AUTHENTICATION",
            RequestCategory::Misc => "MISC",
            RequestCategory::GetStudentExam => "GET_STUDENT_EXAM",
            RequestCategory::StartStudentExam => "START_STUDENT_EXAM",
            RequestCategory::SubmitExercise => "SUBMIT_EXERCISE",
            RequestCategory::SubmitStudentExam => "SUBMIT_STUDENT_EXAM",
            RequestCategory::CloneSsh => "CLONE_SSH",
            RequestCategory::CloneToken => "CLONE_TOKEN",
            RequestCategory::ClonePassword => "CLONE_PASSWORD",
            RequestCategory::PushSsh => "PUSH_SSH",
            RequestCategory::PushToken => "PUSH_TOKEN",
            RequestCategory::PushPassword => "PUSH_PASSWORD",
        }
    }
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One timed, categorised unit of observed work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub category: RequestCategory,
}

impl RequestSample {
    pub fn new(timestamp: DateTime<Utc>, duration: Duration, category: RequestCategory) -> Self {
        Self {
            timestamp,
            duration,
            category,
        }
    }

    /// Time a single request, producing the sample alongside the request's result.
    pub fn record<T, E>(
        category: RequestCategory,
        op: impl FnOnce() -> Result<T, E>,
    ) -> (Result<T, E>, RequestSample) {
        let timestamp = Utc::now();
        let started = std::time::Instant::now();
        let result = op();
        (result, Self::new(timestamp, started.elapsed(), category))
    }
}
