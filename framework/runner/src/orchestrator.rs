use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeDelta, Utc};
use cohort_core::prelude::{DelegatedCancelListener, RunCancelledError};
use cohort_instruments::{aggregate, print_summary, RequestSample};
use parking_lot::Mutex;

use crate::config::OrchestratorConfig;
use crate::dispatcher::{self, UnitOfWork};
use crate::driver::{AdminActions, DriverFactory, ParticipantActions};
use crate::executor::Executor;
use crate::model::{CiStatus, LogEntry, Run, RunStatus, SimulationDefinition};
use crate::observer::RunObserver;
use crate::persistence::Persistence;
use crate::progress::phase_progress;
use crate::types::HarnessResult;

/// Which created resources a failure (or a finished run) must tear down.
#[derive(Debug, Clone, Default)]
enum CleanupScope {
    #[default]
    None,
    /// Only the exam was created by this run; the course pre-existed.
    Exam { course_id: String, exam_id: String },
    /// The course was created by this run. Deleting it covers the exam.
    Course { course_id: String },
}

/// Mutable state accumulated while a run executes, kept outside the phase functions so the
/// failure path still knows what was created and who can delete it.
#[derive(Default)]
struct RunContext {
    admin: Option<Arc<dyn AdminActions>>,
    course_id: Option<String>,
    scope: CleanupScope,
}

/// Executes one run at a time through its phases: setup, the participant fan-out, aggregation
/// and teardown. The entry point is mutually exclusive; at most one run is RUNNING system-wide.
pub struct RunOrchestrator {
    persistence: Arc<dyn Persistence>,
    observer: Arc<dyn RunObserver>,
    drivers: Arc<dyn DriverFactory>,
    executor: Arc<Executor>,
    config: OrchestratorConfig,
    active: Mutex<()>,
}

impl RunOrchestrator {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        observer: Arc<dyn RunObserver>,
        drivers: Arc<dyn DriverFactory>,
        config: OrchestratorConfig,
    ) -> HarnessResult<Self> {
        Ok(Self {
            persistence,
            observer,
            drivers,
            executor: Arc::new(Executor::new()?),
            config,
            active: Mutex::new(()),
        })
    }

    /// Drive `run` to a terminal state.
    ///
    /// Phase errors are handled here: the run is transitioned to FAILED (or CANCELLED when the
    /// operator interrupted it) and scoped cleanup is launched, so the queue consumer regains
    /// control in every handled case. `schedule_id` is the originating schedule, passed
    /// explicitly because a run does not store it.
    pub fn execute(
        &self,
        mut run: Run,
        definition: &SimulationDefinition,
        schedule_id: Option<&str>,
        cancel: DelegatedCancelListener,
    ) -> HarnessResult<Run> {
        let _exclusive = self.active.lock();

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.persistence
            .save_run(&run)
            .context("Failed to persist the RUNNING transition")?;
        self.observer.run_status_changed(&run);
        log::info!("Run {} is now running", run.id);

        if let Some(schedule_id) = schedule_id {
            self.log(&mut run, format!("Run triggered by schedule {schedule_id}"), false);
        }

        let mut ctx = RunContext::default();
        let outcome = self.drive(&mut run, definition, &mut ctx, &cancel);

        match outcome {
            Ok(()) => {
                self.log(&mut run, "Run finished", false);
                self.transition(&mut run, RunStatus::Finished);
                self.observer.run_result_ready(&run);
                if let Some(stats) = &run.stats {
                    print_summary(stats);
                }

                if let (Some(admin), Some(course_id)) = (ctx.admin.clone(), ctx.course_id.clone())
                {
                    if self.config.cleanup_enabled {
                        self.spawn_cleanup(&run.id, admin, ctx.scope.clone(), cancel.clone());
                    } else {
                        // Leave the environment intact but keep watching the build queue so
                        // the operator can tell when it has drained.
                        self.spawn_build_watcher(&run.id, admin, course_id, cancel.clone());
                    }
                }
            }
            Err(e) if e.is::<RunCancelledError>() => {
                self.log(&mut run, "Run cancelled", true);
                self.transition(&mut run, RunStatus::Cancelled);
            }
            Err(e) => {
                self.log(&mut run, format!("Run failed: {e:#}"), true);
                self.transition(&mut run, RunStatus::Failed);
                if let Some(admin) = ctx.admin.clone() {
                    self.spawn_cleanup(&run.id, admin, ctx.scope.clone(), cancel.clone());
                }
            }
        }

        Ok(run)
    }

    fn drive(
        &self,
        run: &mut Run,
        definition: &SimulationDefinition,
        ctx: &mut RunContext,
        cancel: &DelegatedCancelListener,
    ) -> HarnessResult<()> {
        let admin = self.resolve_admin(run, definition)?;
        ctx.admin = Some(admin.clone());
        admin.login().context("Administrator login failed")?;

        let participants = self
            .drivers
            .participants(definition)
            .context("Failed to resolve participant actors")?;
        if participants.is_empty() {
            anyhow::bail!("Definition {} resolves to zero participants", definition.id);
        }
        self.log(run, format!("Resolved {} participants", participants.len()), false);
        self.check_cancelled(cancel)?;

        let (course_id, exam_id, side_exercise_id) = if definition.mode.performs_setup() {
            self.set_up(run, definition, &admin, &participants, ctx, cancel)?
        } else {
            (
                definition
                    .existing_course_id
                    .clone()
                    .context("Mode requires an existing course id")?,
                definition
                    .existing_exam_id
                    .clone()
                    .context("Mode requires an existing exam id")?,
                None,
            )
        };
        ctx.course_id = Some(course_id.clone());

        let mut samples = Vec::new();

        let login_tasks: Vec<UnitOfWork> = participants
            .iter()
            .cloned()
            .map(|p| Box::new(move || p.login()) as UnitOfWork)
            .collect();
        samples.extend(self.fan_out(run, "login", login_tasks, cancel)?);

        let startup_tasks: Vec<UnitOfWork> = participants
            .iter()
            .cloned()
            .map(|p| Box::new(move || p.perform_startup_calls()) as UnitOfWork)
            .collect();
        samples.extend(self.fan_out(run, "startup calls", startup_tasks, cancel)?);

        // Snapshot the build queue as load is first applied, so build-queue draining is
        // measured from the same moment.
        match admin.build_queue_size(&course_id) {
            Ok(size) => {
                run.ci_status = Some(CiStatus {
                    build_queue_size: size,
                    recorded_at: Utc::now(),
                });
            }
            Err(e) => log::warn!("Failed to snapshot the build queue for run {}: {e:?}", run.id),
        }

        let begin_tasks: Vec<UnitOfWork> = participants
            .iter()
            .cloned()
            .map(|p| {
                let course_id = course_id.clone();
                let exam_id = exam_id.clone();
                let side_exercise_id = side_exercise_id.clone();
                Box::new(move || {
                    p.begin_exam_participation(&course_id, &exam_id, side_exercise_id.as_deref())
                }) as UnitOfWork
            })
            .collect();
        samples.extend(self.fan_out(run, "begin participation", begin_tasks, cancel)?);

        let work_tasks: Vec<UnitOfWork> = participants
            .iter()
            .cloned()
            .map(|p| {
                let course_id = course_id.clone();
                let exam_id = exam_id.clone();
                Box::new(move || {
                    let mut samples = p.participate_in_exam(&course_id, &exam_id)?;
                    samples.extend(p.submit_and_end_exam(&course_id, &exam_id)?);
                    Ok(samples)
                }) as UnitOfWork
            })
            .collect();
        samples.extend(self.fan_out(run, "exam work", work_tasks, cancel)?);

        self.check_cancelled(cancel)?;
        self.log(run, format!("Collected {} request samples", samples.len()), false);
        run.stats = Some(aggregate(&samples));

        Ok(())
    }

    /// The setup half of a run: course, side exercise, exam, preparation and the settle
    /// delay. Returns the course id, exam id and the side exercise id the fan-out phases use.
    fn set_up(
        &self,
        run: &mut Run,
        definition: &SimulationDefinition,
        admin: &Arc<dyn AdminActions>,
        participants: &[Arc<dyn ParticipantActions>],
        ctx: &mut RunContext,
        cancel: &DelegatedCancelListener,
    ) -> HarnessResult<(String, String, Option<String>)> {
        let course_id = if definition.mode.creates_course() {
            let course_id = admin.create_course().context("Failed to create course")?;
            ctx.scope = CleanupScope::Course {
                course_id: course_id.clone(),
            };
            self.log(run, format!("Created course {course_id}"), false);

            // Registration failures are skipped per participant, never retried and never fatal.
            let tasks: Vec<UnitOfWork> = participants
                .iter()
                .map(|p| {
                    let admin = admin.clone();
                    let course_id = course_id.clone();
                    let username = p.username().to_string();
                    Box::new(move || {
                        admin
                            .register_participant(&course_id, &username)
                            .map(|_| Vec::new())
                    }) as UnitOfWork
                })
                .collect();
            self.fan_out(run, "course registration", tasks, cancel)?;

            course_id
        } else {
            let course_id = definition
                .existing_course_id
                .clone()
                .context("Mode requires an existing course id")?;
            admin
                .get_course(&course_id)
                .context("Failed to fetch existing course")?;
            course_id
        };
        self.check_cancelled(cancel)?;

        let side_exercise_id = admin
            .create_side_exercise(&course_id)
            .context("Failed to create side exercise")?;

        let exam_id = if definition.mode.creates_exam() {
            let exam_id = admin
                .create_exam(&course_id)
                .context("Failed to create exam")?;
            if !definition.mode.creates_course() {
                ctx.scope = CleanupScope::Exam {
                    course_id: course_id.clone(),
                    exam_id: exam_id.clone(),
                };
            }
            self.log(run, format!("Created exam {exam_id} on course {course_id}"), false);

            admin
                .create_exam_exercises(&course_id, &exam_id)
                .context("Failed to create exam exercises")?;
            admin
                .register_participants_for_exam(&course_id, &exam_id)
                .context("Failed to register participants for the exam")?;
            exam_id
        } else {
            definition
                .existing_exam_id
                .clone()
                .context("Mode requires an existing exam id")?
        };
        self.check_cancelled(cancel)?;

        self.prepare_exam(run, admin, &course_id, &exam_id, cancel)?;

        if !self.config.test_mode {
            self.log(run, "Waiting for downstream systems to settle", false);
            self.executor
                .interruptible_sleep(self.config.settle_delay, cancel.clone())?;
        }

        Ok((course_id, exam_id, Some(side_exercise_id)))
    }

    /// Move the exam into the future, generate student exams, provision repositories, poll
    /// until every student exam is accounted for, then pull the start date back to now.
    fn prepare_exam(
        &self,
        run: &mut Run,
        admin: &Arc<dyn AdminActions>,
        course_id: &str,
        exam_id: &str,
        cancel: &DelegatedCancelListener,
    ) -> HarnessResult<()> {
        admin
            .fetch_exam(course_id, exam_id)
            .context("Failed to fetch exam for preparation")?;

        let hold_off = Utc::now() + TimeDelta::days(1);
        admin
            .update_exam_dates(
                course_id,
                exam_id,
                hold_off,
                hold_off + TimeDelta::minutes(30),
                hold_off + TimeDelta::minutes(30) + TimeDelta::hours(2),
            )
            .context("Failed to move exam dates into the future")?;
        admin
            .generate_student_exams(course_id, exam_id)
            .context("Failed to generate student exams")?;
        admin
            .start_exercise_provisioning(course_id, exam_id)
            .context("Failed to start exercise repository provisioning")?;

        self.log(run, "Waiting for exam preparation to finish", false);
        loop {
            self.check_cancelled(cancel)?;
            let status = admin
                .preparation_status(course_id, exam_id)
                .context("Failed to poll exam preparation status")?;
            if status.is_done() {
                if status.failed > 0 {
                    self.log(
                        run,
                        format!(
                            "{} of {} student exams failed to prepare",
                            status.failed, status.overall
                        ),
                        false,
                    );
                }
                break;
            }
            log::debug!(
                "Exam preparation at {}/{} ({} failed)",
                status.finished,
                status.overall,
                status.failed
            );
            self.executor
                .interruptible_sleep(self.config.preparation_poll_interval, cancel.clone())?;
        }

        let starts_at = Utc::now();
        admin
            .update_exam_dates(
                course_id,
                exam_id,
                starts_at,
                starts_at,
                starts_at + TimeDelta::hours(2),
            )
            .context("Failed to rewrite the exam start date")?;

        Ok(())
    }

    /// Dispatch one fan-out phase. Individual task failures are isolated by the dispatcher and
    /// never fail the run; only cancellation crosses this boundary as an error.
    fn fan_out(
        &self,
        run: &mut Run,
        label: &str,
        tasks: Vec<UnitOfWork>,
        cancel: &DelegatedCancelListener,
    ) -> HarnessResult<Vec<RequestSample>> {
        self.check_cancelled(cancel)?;
        self.log(
            run,
            format!("Phase [{label}]: dispatching {} participants", tasks.len()),
            false,
        );

        let progress =
            (!self.config.no_progress).then(|| phase_progress(label, tasks.len() as u64));

        Ok(dispatcher::run_all(
            &self.executor,
            label,
            tasks,
            self.config.fanout_factor,
            cancel.clone(),
            progress,
        ))
    }

    /// An operator-supplied account is required exactly when the target is
    /// production-like and the mode needs elevated setup rights; otherwise the managed pool
    /// provides the admin.
    fn resolve_admin(
        &self,
        run: &Run,
        definition: &SimulationDefinition,
    ) -> HarnessResult<Arc<dyn AdminActions>> {
        let credentials = run
            .admin_override
            .clone()
            .or_else(|| definition.instructor_credentials.clone());

        if definition.is_production_target && definition.mode.performs_setup() {
            let credentials = credentials.context(
                "An operator-supplied admin account is required for setup against a production target",
            )?;
            return self.drivers.admin_with_credentials(definition, &credentials);
        }

        match credentials {
            Some(credentials) => self.drivers.admin_with_credentials(definition, &credentials),
            None => self.drivers.pool_admin(definition),
        }
    }

    fn check_cancelled(&self, cancel: &DelegatedCancelListener) -> HarnessResult<()> {
        if cancel.clone().should_cancel() {
            return Err(anyhow::anyhow!(RunCancelledError::default()));
        }
        Ok(())
    }

    fn log(&self, run: &mut Run, message: impl Into<String>, is_error: bool) {
        let entry = LogEntry::new(message, is_error);
        if is_error {
            log::error!("Run {}: {}", run.id, entry.message);
        } else {
            log::info!("Run {}: {}", run.id, entry.message);
        }

        run.log.push(entry.clone());
        if let Err(e) = self.persistence.append_run_log(&run.id, &entry) {
            log::warn!("Failed to persist log entry for run {}: {e:?}", run.id);
        }
        self.observer.run_log_appended(&run.id, &entry);
    }

    fn transition(&self, run: &mut Run, status: RunStatus) {
        run.status = status;
        if status.is_terminal() {
            run.ended_at = Some(Utc::now());
        }
        if let Err(e) = self.persistence.save_run(run) {
            log::error!("Failed to persist {status:?} transition for run {}: {e:?}", run.id);
        }
        self.observer.run_status_changed(run);
    }

    /// Tear down whatever `scope` covers, detached so the queue can start the next run
    /// immediately. Cleanup failures are logged against the run and never change its
    /// already-terminal status. Skipped when cancellation has been requested.
    fn spawn_cleanup(
        &self,
        run_id: &str,
        admin: Arc<dyn AdminActions>,
        scope: CleanupScope,
        mut cancel: DelegatedCancelListener,
    ) {
        if matches!(scope, CleanupScope::None) {
            return;
        }

        let persistence = self.persistence.clone();
        let observer = self.observer.clone();
        let grace = self.config.cleanup_grace;
        let run_id = run_id.to_string();

        std::thread::Builder::new()
            .name(format!("cleanup-{run_id}"))
            .spawn(move || {
                if cancel.should_cancel() {
                    log::debug!("Skipping cleanup for run {run_id}, cancellation requested");
                    return;
                }
                log::info!("Cleaning up resources created by run {run_id}");

                if let Err(e) = admin.cancel_queued_build_jobs() {
                    cleanup_log(
                        &*persistence,
                        &*observer,
                        &run_id,
                        format!("Cleanup: failed to cancel queued build jobs: {e:#}"),
                        true,
                    );
                }

                // Give the CI system a moment to drop the cancelled jobs before their targets
                // disappear underneath them.
                std::thread::sleep(grace);
                if cancel.should_cancel() {
                    return;
                }

                let result = match &scope {
                    CleanupScope::Exam { course_id, exam_id } => admin
                        .delete_exam(course_id, exam_id)
                        .map(|_| format!("Cleanup: deleted exam {exam_id}")),
                    CleanupScope::Course { course_id } => admin
                        .delete_course(course_id)
                        .map(|_| format!("Cleanup: deleted course {course_id}")),
                    CleanupScope::None => return,
                };

                match result {
                    Ok(message) => cleanup_log(&*persistence, &*observer, &run_id, message, false),
                    Err(e) => cleanup_log(
                        &*persistence,
                        &*observer,
                        &run_id,
                        format!("Cleanup failed: {e:#}"),
                        true,
                    ),
                }
            })
            .expect("Failed to spawn cleanup thread");
    }

    /// Used when cleanup is disabled for the target: keep polling the build queue after the
    /// run so the operator can see when it has drained, without destroying the environment.
    fn spawn_build_watcher(
        &self,
        run_id: &str,
        admin: Arc<dyn AdminActions>,
        course_id: String,
        mut cancel: DelegatedCancelListener,
    ) {
        let interval = self.config.build_watch_interval;
        let run_id = run_id.to_string();

        std::thread::Builder::new()
            .name(format!("build-watch-{run_id}"))
            .spawn(move || loop {
                if cancel.should_cancel() {
                    break;
                }
                match admin.build_queue_size(&course_id) {
                    Ok(0) => {
                        log::info!("Build queue for course {course_id} has drained");
                        break;
                    }
                    Ok(size) => {
                        log::info!("{size} build jobs still queued for course {course_id}")
                    }
                    Err(e) => {
                        log::warn!("Failed to poll build queue for course {course_id}: {e:?}");
                        break;
                    }
                }
                std::thread::sleep(interval);
            })
            .expect("Failed to spawn build watcher thread");
    }
}

/// Log-append used by detached cleanup, which outlives the orchestrator's borrow of the run.
fn cleanup_log(
    persistence: &dyn Persistence,
    observer: &dyn RunObserver,
    run_id: &str,
    message: String,
    is_error: bool,
) {
    if is_error {
        log::error!("Run {run_id}: {message}");
    } else {
        log::info!("Run {run_id}: {message}");
    }

    let entry = LogEntry::new(message, is_error);
    if let Err(e) = persistence.append_run_log(run_id, &entry) {
        log::warn!("Failed to persist cleanup log entry for run {run_id}: {e:?}");
    }
    observer.run_log_appended(run_id, &entry);
}
