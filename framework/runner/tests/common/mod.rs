#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cohort_runner::prelude::*;
use parking_lot::Mutex;

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        test_mode: true,
        no_progress: true,
        preparation_poll_interval: Duration::from_millis(2),
        cleanup_grace: Duration::ZERO,
        build_watch_interval: Duration::from_millis(5),
        ..OrchestratorConfig::default()
    }
}

pub fn definition(mode: SimulationMode, participants: usize) -> SimulationDefinition {
    SimulationDefinition {
        id: "def-1".to_string(),
        name: "load test".to_string(),
        target_host: "lms.test".to_string(),
        mode,
        first_participant: 1,
        last_participant: participants,
        commits_min: 1,
        commits_max: 3,
        auth_mix: AuthMechanismMix::default(),
        existing_course_id: Some("course-9".to_string()),
        existing_exam_id: Some("exam-9".to_string()),
        instructor_credentials: None,
        is_production_target: false,
    }
}

/// Poll `condition` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPersistence {
    pub definitions: Mutex<HashMap<String, SimulationDefinition>>,
    pub runs: Mutex<HashMap<String, Run>>,
    pub schedules: Mutex<HashMap<String, ScheduleRule>>,
    /// Deletions in call order, as `subscribers:<id>` and `schedule:<id>` markers.
    pub deletions: Mutex<Vec<String>>,
}

impl InMemoryPersistence {
    pub fn run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.lock().get(run_id).map(|run| run.status)
    }

    pub fn run_log(&self, run_id: &str) -> Vec<LogEntry> {
        self.runs
            .lock()
            .get(run_id)
            .map(|run| run.log.clone())
            .unwrap_or_default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_definition(&self, definition: &SimulationDefinition) -> anyhow::Result<()> {
        self.definitions
            .lock()
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    fn definition(&self, id: &str) -> anyhow::Result<Option<SimulationDefinition>> {
        Ok(self.definitions.lock().get(id).cloned())
    }

    fn save_run(&self, run: &Run) -> anyhow::Result<()> {
        self.runs.lock().insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn run(&self, id: &str) -> anyhow::Result<Option<Run>> {
        Ok(self.runs.lock().get(id).cloned())
    }

    fn append_run_log(&self, run_id: &str, entry: &LogEntry) -> anyhow::Result<()> {
        let mut runs = self.runs.lock();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow::anyhow!("unknown run {run_id}"))?;
        run.log.push(entry.clone());
        Ok(())
    }

    fn queued_runs(&self) -> anyhow::Result<Vec<Run>> {
        let mut queued: Vec<_> = self
            .runs
            .lock()
            .values()
            .filter(|run| run.status == RunStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
        Ok(queued)
    }

    fn save_schedule(&self, rule: &ScheduleRule) -> anyhow::Result<()> {
        self.schedules.lock().insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    fn due_schedules(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduleRule>> {
        Ok(self
            .schedules
            .lock()
            .values()
            .filter(|rule| rule.next_fire.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }

    fn delete_schedule_subscribers(&self, rule_id: &str) -> anyhow::Result<()> {
        if let Some(rule) = self.schedules.lock().get_mut(rule_id) {
            rule.subscribers.clear();
        }
        self.deletions.lock().push(format!("subscribers:{rule_id}"));
        Ok(())
    }

    fn delete_schedule(&self, rule_id: &str) -> anyhow::Result<()> {
        self.schedules.lock().remove(rule_id);
        self.deletions.lock().push(format!("schedule:{rule_id}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Queued(String),
    Status(String, RunStatus),
    Log(String, LogEntry),
    ResultReady(String),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn statuses(&self, run_id: &str) -> Vec<RunStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObserverEvent::Status(id, status) if id == run_id => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Run ids in the order they were observed entering the RUNNING state.
    pub fn running_order(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObserverEvent::Status(id, RunStatus::Running) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn status_events(&self) -> Vec<(String, RunStatus)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ObserverEvent::Status(id, status) => Some((id.clone(), *status)),
                _ => None,
            })
            .collect()
    }
}

impl RunObserver for RecordingObserver {
    fn run_queued(&self, run: &Run) {
        self.events.lock().push(ObserverEvent::Queued(run.id.clone()));
    }

    fn run_status_changed(&self, run: &Run) {
        self.events
            .lock()
            .push(ObserverEvent::Status(run.id.clone(), run.status));
    }

    fn run_log_appended(&self, run_id: &str, entry: &LogEntry) {
        self.events
            .lock()
            .push(ObserverEvent::Log(run_id.to_string(), entry.clone()));
    }

    fn run_result_ready(&self, run: &Run) {
        self.events
            .lock()
            .push(ObserverEvent::ResultReady(run.id.clone()));
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Admin actor that records every call and fails on demand.
#[derive(Default)]
pub struct MockAdmin {
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Option<String>,
    /// How many preparation polls report "not done" before the exam counts as prepared.
    pub prep_polls_until_done: AtomicUsize,
    polls: AtomicUsize,
    pub build_queue_size: u64,
}

impl MockAdmin {
    pub fn failing_on(call: &str) -> Self {
        Self {
            fail_on: Some(call.to_string()),
            ..Self::default()
        }
    }

    pub fn set_prep_polls_until_done(&self, polls: usize) {
        self.prep_polls_until_done.store(polls, Ordering::SeqCst);
    }

    pub fn has_call(&self, name: &str) -> bool {
        self.calls.lock().iter().any(|call| call == name)
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == name).count()
    }

    fn record(&self, name: &str) -> anyhow::Result<()> {
        self.calls.lock().push(name.to_string());
        if self.fail_on.as_deref() == Some(name) {
            anyhow::bail!("injected failure in {name}");
        }
        Ok(())
    }
}

impl AdminActions for MockAdmin {
    fn login(&self) -> anyhow::Result<()> {
        self.record("login")
    }

    fn create_course(&self) -> anyhow::Result<String> {
        self.record("create_course")?;
        Ok("course-1".to_string())
    }

    fn get_course(&self, _course_id: &str) -> anyhow::Result<()> {
        self.record("get_course")
    }

    fn delete_course(&self, _course_id: &str) -> anyhow::Result<()> {
        self.record("delete_course")
    }

    fn create_exam(&self, _course_id: &str) -> anyhow::Result<String> {
        self.record("create_exam")?;
        Ok("exam-1".to_string())
    }

    fn create_exam_exercises(&self, _course_id: &str, _exam_id: &str) -> anyhow::Result<()> {
        self.record("create_exam_exercises")
    }

    fn delete_exam(&self, _course_id: &str, _exam_id: &str) -> anyhow::Result<()> {
        self.record("delete_exam")
    }

    fn register_participant(&self, _course_id: &str, _username: &str) -> anyhow::Result<()> {
        self.record("register_participant")
    }

    fn register_participants_for_exam(
        &self,
        _course_id: &str,
        _exam_id: &str,
    ) -> anyhow::Result<()> {
        self.record("register_participants_for_exam")
    }

    fn create_side_exercise(&self, _course_id: &str) -> anyhow::Result<String> {
        self.record("create_side_exercise")?;
        Ok("aux-1".to_string())
    }

    fn fetch_exam(&self, _course_id: &str, _exam_id: &str) -> anyhow::Result<()> {
        self.record("fetch_exam")
    }

    fn update_exam_dates(
        &self,
        _course_id: &str,
        _exam_id: &str,
        _visible_from: DateTime<Utc>,
        _starts_at: DateTime<Utc>,
        _ends_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.record("update_exam_dates")
    }

    fn generate_student_exams(&self, _course_id: &str, _exam_id: &str) -> anyhow::Result<()> {
        self.record("generate_student_exams")
    }

    fn start_exercise_provisioning(&self, _course_id: &str, _exam_id: &str) -> anyhow::Result<()> {
        self.record("start_exercise_provisioning")
    }

    fn preparation_status(
        &self,
        _course_id: &str,
        _exam_id: &str,
    ) -> anyhow::Result<PreparationStatus> {
        self.record("preparation_status")?;
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll > self.prep_polls_until_done.load(Ordering::SeqCst) {
            Ok(PreparationStatus {
                finished: 5,
                failed: 0,
                overall: 5,
            })
        } else {
            Ok(PreparationStatus {
                finished: 1,
                failed: 0,
                overall: 5,
            })
        }
    }

    fn cancel_queued_build_jobs(&self) -> anyhow::Result<()> {
        self.record("cancel_queued_build_jobs")
    }

    fn cancel_running_build_jobs(&self) -> anyhow::Result<()> {
        self.record("cancel_running_build_jobs")
    }

    fn build_queue_size(&self, _course_id: &str) -> anyhow::Result<u64> {
        self.record("build_queue_size")?;
        Ok(self.build_queue_size)
    }
}

pub struct MockParticipant {
    pub username: String,
    pub delay: Duration,
}

impl MockParticipant {
    fn sample(&self, category: RequestCategory, ms: u64) -> RequestSample {
        RequestSample::new(Utc::now(), Duration::from_millis(ms), category)
    }
}

impl ParticipantActions for MockParticipant {
    fn username(&self) -> &str {
        &self.username
    }

    fn login(&self) -> anyhow::Result<Vec<RequestSample>> {
        std::thread::sleep(self.delay);
        Ok(vec![self.sample(RequestCategory::Authentication, 100)])
    }

    fn perform_startup_calls(&self) -> anyhow::Result<Vec<RequestSample>> {
        Ok(vec![self.sample(RequestCategory::Misc, 20)])
    }

    fn begin_exam_participation(
        &self,
        _course_id: &str,
        _exam_id: &str,
        _side_exercise_id: Option<&str>,
    ) -> anyhow::Result<Vec<RequestSample>> {
        Ok(vec![
            self.sample(RequestCategory::GetStudentExam, 50),
            self.sample(RequestCategory::StartStudentExam, 60),
        ])
    }

    fn participate_in_exam(
        &self,
        _course_id: &str,
        _exam_id: &str,
    ) -> anyhow::Result<Vec<RequestSample>> {
        Ok(vec![
            self.sample(RequestCategory::SubmitExercise, 80),
            self.sample(RequestCategory::PushToken, 200),
        ])
    }

    fn submit_and_end_exam(
        &self,
        _course_id: &str,
        _exam_id: &str,
    ) -> anyhow::Result<Vec<RequestSample>> {
        Ok(vec![self.sample(RequestCategory::SubmitStudentExam, 120)])
    }
}

pub struct MockDriverFactory {
    pub admin: Arc<MockAdmin>,
    pub participant_delay: Duration,
    pub credential_logins: Mutex<Vec<String>>,
}

impl MockDriverFactory {
    pub fn new(admin: Arc<MockAdmin>) -> Self {
        Self {
            admin,
            participant_delay: Duration::ZERO,
            credential_logins: Mutex::new(Vec::new()),
        }
    }
}

impl DriverFactory for MockDriverFactory {
    fn pool_admin(
        &self,
        _definition: &SimulationDefinition,
    ) -> anyhow::Result<Arc<dyn AdminActions>> {
        Ok(self.admin.clone())
    }

    fn admin_with_credentials(
        &self,
        _definition: &SimulationDefinition,
        credentials: &Credentials,
    ) -> anyhow::Result<Arc<dyn AdminActions>> {
        self.credential_logins.lock().push(credentials.username.clone());
        Ok(self.admin.clone())
    }

    fn participants(
        &self,
        definition: &SimulationDefinition,
    ) -> anyhow::Result<Vec<Arc<dyn ParticipantActions>>> {
        Ok(definition
            .participant_indices()
            .map(|index| {
                Arc::new(MockParticipant {
                    username: format!("student{index}"),
                    delay: self.participant_delay,
                }) as Arc<dyn ParticipantActions>
            })
            .collect())
    }
}

/// Wire up an orchestrator and queue around the given mocks.
pub struct Harness {
    pub persistence: Arc<InMemoryPersistence>,
    pub observer: Arc<RecordingObserver>,
    pub admin: Arc<MockAdmin>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub queue: Arc<RunQueue>,
}

impl Harness {
    pub fn new(admin: MockAdmin) -> Self {
        Self::build(admin, Duration::ZERO, test_config())
    }

    pub fn with_factory_delay(admin: MockAdmin, participant_delay: Duration) -> Self {
        Self::build(admin, participant_delay, test_config())
    }

    pub fn with_config(admin: MockAdmin, config: OrchestratorConfig) -> Self {
        Self::build(admin, Duration::ZERO, config)
    }

    fn build(admin: MockAdmin, participant_delay: Duration, config: OrchestratorConfig) -> Self {
        let persistence = Arc::new(InMemoryPersistence::default());
        let observer = Arc::new(RecordingObserver::default());
        let admin = Arc::new(admin);
        let mut factory = MockDriverFactory::new(admin.clone());
        factory.participant_delay = participant_delay;

        let orchestrator = Arc::new(
            RunOrchestrator::new(
                persistence.clone(),
                observer.clone(),
                Arc::new(factory),
                config,
            )
            .expect("Failed to build orchestrator"),
        );
        let queue = Arc::new(RunQueue::new(
            orchestrator.clone(),
            persistence.clone(),
            observer.clone(),
        ));

        Self {
            persistence,
            observer,
            admin,
            orchestrator,
            queue,
        }
    }

    /// Persist a queued run for `definition` and hand it to the queue.
    pub fn enqueue_run(&self, definition: &SimulationDefinition) -> Run {
        let run = Run::queued(definition);
        self.persistence.save_run(&run).unwrap();
        self.queue
            .enqueue(run.clone(), definition.clone(), None);
        run
    }
}
