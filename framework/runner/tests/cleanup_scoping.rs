mod common;

use std::time::Duration;

use cohort_runner::prelude::*;
use common::*;
use pretty_assertions::assert_eq;

#[test]
fn failed_exam_registration_deletes_only_the_exam() {
    // The course pre-exists; only the exam is created by the run.
    let harness = Harness::new(MockAdmin::failing_on("register_participants_for_exam"));
    let definition = definition(SimulationMode::ExistingCourseCreateExam, 2);

    harness.queue.start().unwrap();
    let run = harness.enqueue_run(&definition);

    assert!(wait_until(Duration::from_secs(5), || {
        harness.persistence.run_status(&run.id) == Some(RunStatus::Failed)
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        harness.admin.has_call("delete_exam")
    }));

    assert!(harness.admin.has_call("cancel_queued_build_jobs"));
    assert!(!harness.admin.has_call("delete_course"));

    let log = harness.persistence.run_log(&run.id);
    assert!(log
        .iter()
        .any(|entry| entry.is_error && entry.message.contains("register participants")));
}

#[test]
fn failure_after_course_creation_deletes_the_course() {
    let harness = Harness::new(MockAdmin::failing_on("create_side_exercise"));
    let definition = definition(SimulationMode::CreateCourseAndExam, 2);

    harness.queue.start().unwrap();
    let run = harness.enqueue_run(&definition);

    assert!(wait_until(Duration::from_secs(5), || {
        harness.persistence.run_status(&run.id) == Some(RunStatus::Failed)
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        harness.admin.has_call("delete_course")
    }));

    assert!(!harness.admin.has_call("delete_exam"));
}

#[test]
fn failure_before_anything_is_created_needs_no_cleanup() {
    let harness = Harness::new(MockAdmin::failing_on("login"));
    let definition = definition(SimulationMode::CreateCourseAndExam, 2);

    harness.queue.start().unwrap();
    let run = harness.enqueue_run(&definition);

    assert!(wait_until(Duration::from_secs(5), || {
        harness.persistence.run_status(&run.id) == Some(RunStatus::Failed)
    }));

    std::thread::sleep(Duration::from_millis(100));
    assert!(!harness.admin.has_call("cancel_queued_build_jobs"));
    assert!(!harness.admin.has_call("delete_course"));
    assert!(!harness.admin.has_call("delete_exam"));
}

#[test]
fn cleanup_failures_are_logged_but_do_not_change_the_terminal_status() {
    let harness = Harness::new(MockAdmin::failing_on("delete_course"));
    let definition = definition(SimulationMode::CreateCourseAndExam, 2);

    harness.queue.start().unwrap();
    let run = harness.enqueue_run(&definition);

    assert!(wait_until(Duration::from_secs(10), || {
        harness.persistence.run_status(&run.id) == Some(RunStatus::Finished)
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        harness.admin.has_call("delete_course")
    }));

    assert!(wait_until(Duration::from_secs(5), || {
        harness
            .persistence
            .run_log(&run.id)
            .iter()
            .any(|entry| entry.is_error && entry.message.starts_with("Cleanup failed"))
    }));
    assert_eq!(
        Some(RunStatus::Finished),
        harness.persistence.run_status(&run.id)
    );
}

#[test]
fn disabled_cleanup_keeps_the_environment_and_watches_the_build_queue() {
    let config = OrchestratorConfig {
        cleanup_enabled: false,
        ..test_config()
    };
    let harness = Harness::with_config(MockAdmin::default(), config);
    let definition = definition(SimulationMode::CreateCourseAndExam, 2);

    harness.queue.start().unwrap();
    let run = harness.enqueue_run(&definition);

    assert!(wait_until(Duration::from_secs(10), || {
        harness.persistence.run_status(&run.id) == Some(RunStatus::Finished)
    }));

    // The watcher polls the (empty) build queue at least once beyond the CI snapshot.
    assert!(wait_until(Duration::from_secs(5), || {
        harness.admin.count_calls("build_queue_size") >= 2
    }));

    std::thread::sleep(Duration::from_millis(100));
    assert!(!harness.admin.has_call("delete_course"));
    assert!(!harness.admin.has_call("delete_exam"));
    assert!(!harness.admin.has_call("cancel_queued_build_jobs"));
}
