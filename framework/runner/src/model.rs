use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use cohort_instruments::RunStats;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Log messages longer than this are truncated before they are stored on the run.
pub const MAX_LOG_MESSAGE_LEN: usize = 255;

/// How a run obtains the course and exam it drives load against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationMode {
    /// Create a fresh course with a fresh exam and register all participants for both.
    CreateCourseAndExam,
    /// Use an existing course and exam, but conduct the preparation steps before the exam starts.
    ExistingCourseUnpreparedExam,
    /// Use an existing course with a fully prepared exam. No server-side setup at all.
    ExistingCoursePreparedExam,
    /// Use an existing course but create a fresh exam on it.
    ExistingCourseCreateExam,
}

impl SimulationMode {
    /// Whether this mode performs any server-side setup before the fan-out phases.
    pub fn performs_setup(&self) -> bool {
        !matches!(self, SimulationMode::ExistingCoursePreparedExam)
    }

    pub fn creates_course(&self) -> bool {
        matches!(self, SimulationMode::CreateCourseAndExam)
    }

    pub fn creates_exam(&self) -> bool {
        matches!(
            self,
            SimulationMode::CreateCourseAndExam | SimulationMode::ExistingCourseCreateExam
        )
    }

    pub fn requires_existing_course(&self) -> bool {
        !matches!(self, SimulationMode::CreateCourseAndExam)
    }

    pub fn requires_existing_exam(&self) -> bool {
        matches!(
            self,
            SimulationMode::ExistingCourseUnpreparedExam | SimulationMode::ExistingCoursePreparedExam
        )
    }
}

/// Authentication mechanism assigned to a participant for clone and push traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AuthMechanism {
    Password,
    Token,
    Ssh,
}

/// Percentage split of authentication mechanisms across the cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMechanismMix {
    pub password_pct: u8,
    pub token_pct: u8,
    pub ssh_pct: u8,
}

impl Default for AuthMechanismMix {
    fn default() -> Self {
        Self {
            password_pct: 20,
            token_pct: 60,
            ssh_pct: 20,
        }
    }
}

impl AuthMechanismMix {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let sum = self.password_pct as u32 + self.token_pct as u32 + self.ssh_pct as u32;
        if sum != 100 {
            return Err(DefinitionError::AuthMixSum(sum));
        }
        Ok(())
    }

    /// Deterministically assign a mechanism to the participant at `index`, splitting the cohort
    /// proportionally to the configured percentages.
    pub fn mechanism_for(&self, index: usize, participant_count: usize) -> AuthMechanism {
        if participant_count == 0 {
            return AuthMechanism::Password;
        }

        let pct = (index * 100 / participant_count) as u8;
        if pct < self.password_pct {
            AuthMechanism::Password
        } else if pct < self.password_pct + self.token_pct {
            AuthMechanism::Token
        } else {
            AuthMechanism::Ssh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("participant range {0}..={1} is empty")]
    EmptyParticipantRange(usize, usize),

    #[error("authentication mechanism percentages sum to {0}, expected 100")]
    AuthMixSum(u32),

    #[error("commit count range {0}..={1} is empty")]
    EmptyCommitRange(usize, usize),

    #[error("mode requires an existing course id")]
    MissingCourseId,

    #[error("mode requires an existing exam id")]
    MissingExamId,
}

/// The reusable configuration describing what a run should do. Mutated only before any run
/// references it; every run holds the definition's id, never the definition itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationDefinition {
    pub id: String,
    pub name: String,
    /// Host identifier of the target system, resolved by the driver factory.
    pub target_host: String,
    pub mode: SimulationMode,
    /// Inclusive index range into the synthetic account pool. One participant per index.
    pub first_participant: usize,
    pub last_participant: usize,
    /// Inclusive range of commit+push rounds a participant performs per programming exercise.
    pub commits_min: usize,
    pub commits_max: usize,
    pub auth_mix: AuthMechanismMix,
    pub existing_course_id: Option<String>,
    pub existing_exam_id: Option<String>,
    pub instructor_credentials: Option<Credentials>,
    /// Production-like targets require an operator-supplied admin account for setup and are
    /// cleaned up conservatively.
    pub is_production_target: bool,
}

impl SimulationDefinition {
    pub fn participant_indices(&self) -> RangeInclusive<usize> {
        self.first_participant..=self.last_participant
    }

    pub fn participant_count(&self) -> usize {
        if self.last_participant < self.first_participant {
            return 0;
        }
        self.last_participant - self.first_participant + 1
    }

    /// Sample how many commit+push rounds a participant should perform.
    pub fn sample_commit_count(&self, rng: &mut impl Rng) -> usize {
        rng.gen_range(self.commits_min..=self.commits_max)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.last_participant < self.first_participant {
            return Err(DefinitionError::EmptyParticipantRange(
                self.first_participant,
                self.last_participant,
            ));
        }
        if self.commits_max < self.commits_min {
            return Err(DefinitionError::EmptyCommitRange(
                self.commits_min,
                self.commits_max,
            ));
        }
        self.auth_mix.validate()?;
        if self.mode.requires_existing_course() && self.existing_course_id.is_none() {
            return Err(DefinitionError::MissingCourseId);
        }
        if self.mode.requires_existing_exam() && self.existing_exam_id.is_none() {
            return Err(DefinitionError::MissingExamId);
        }
        Ok(())
    }
}

/// Status of a run. Terminal states never restart; a run is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Finished | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One message attached to a run while it was active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub is_error: bool,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, is_error: bool) -> Self {
        let mut message = message.into();
        if message.chars().count() > MAX_LOG_MESSAGE_LEN {
            message = message.chars().take(MAX_LOG_MESSAGE_LEN).collect();
        }

        Self {
            timestamp: Utc::now(),
            message,
            is_error,
        }
    }
}

/// Snapshot of the target's CI build queue, taken as load is first applied so that build-queue
/// draining can be measured from the same moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiStatus {
    pub build_queue_size: u64,
    pub recorded_at: DateTime<Utc>,
}

/// One timed execution attempt of a [SimulationDefinition].
///
/// The originating schedule, if any, is passed explicitly through the queue and orchestrator
/// signatures rather than stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub definition_id: String,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Overrides the definition's instructor credentials for this run only.
    pub admin_override: Option<Credentials>,
    pub stats: Option<RunStats>,
    pub log: Vec<LogEntry>,
    pub ci_status: Option<CiStatus>,
}

impl Run {
    pub fn queued(definition: &SimulationDefinition) -> Self {
        Self {
            id: nanoid::nanoid!(),
            definition_id: definition.id.clone(),
            status: RunStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            admin_override: None,
            stats: None,
            log: Vec::new(),
            ci_status: None,
        }
    }
}

/// The closed set of exercise kinds a participant may be assigned. Drivers dispatch on this
/// exhaustively; programming is the only kind that produces clone/commit/push traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExerciseKind {
    Modeling,
    Text,
    Quiz,
    Programming,
    FileUpload,
}
