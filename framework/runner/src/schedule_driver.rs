use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cohort_core::prelude::DelegatedCancelListener;

use crate::model::Run;
use crate::persistence::Persistence;
use crate::queue::RunQueue;
use crate::schedule::{next_fire, ScheduleRule};
use crate::types::HarnessResult;

/// Start the ticker that fires due schedules.
///
/// Every tick loads the due rules, queues a fresh run for each and recomputes the rule's next
/// fire time; rules whose next fire would fall after their end date are deleted instead.
/// Independent of the queue consumer, the only coupling is the enqueue call.
pub fn start_schedule_driver(
    persistence: Arc<dyn Persistence>,
    queue: Arc<RunQueue>,
    tick_interval: Duration,
    mut stop: DelegatedCancelListener,
) {
    std::thread::Builder::new()
        .name("schedule-driver".to_string())
        .spawn(move || loop {
            if stop.should_cancel() {
                log::trace!("Schedule driver stopping");
                break;
            }
            tick(&*persistence, &queue, Utc::now());
            std::thread::sleep(tick_interval);
        })
        .expect("Failed to start schedule driver thread");
}

/// One sweep over the due schedules. A failure on one rule is logged and does not prevent the
/// remaining rules from firing.
pub fn tick(persistence: &dyn Persistence, queue: &RunQueue, now: DateTime<Utc>) {
    let due = match persistence.due_schedules(now) {
        Ok(due) => due,
        Err(e) => {
            log::error!("Failed to load due schedules: {e:?}");
            return;
        }
    };

    for rule in due {
        let rule_id = rule.id.clone();
        if let Err(e) = fire_rule(persistence, queue, rule, now) {
            log::error!("Failed to fire schedule {rule_id}: {e:?}");
        }
    }
}

fn fire_rule(
    persistence: &dyn Persistence,
    queue: &RunQueue,
    mut rule: ScheduleRule,
    now: DateTime<Utc>,
) -> HarnessResult<()> {
    let Some(definition) = persistence.definition(&rule.definition_id)? else {
        anyhow::bail!(
            "Definition {} for schedule {} does not exist",
            rule.definition_id,
            rule.id
        );
    };

    let run = Run::queued(&definition);
    persistence.save_run(&run)?;
    log::info!("Schedule {} queued run {}", rule.id, run.id);
    queue.enqueue(run, definition, Some(rule.id.clone()));

    let next = next_fire(&rule, now);
    match rule.ends_at {
        Some(end) if next > end => {
            // Children before parent.
            persistence.delete_schedule_subscribers(&rule.id)?;
            persistence.delete_schedule(&rule.id)?;
            log::info!("Schedule {} has passed its end date and was removed", rule.id);
        }
        _ => {
            rule.next_fire = Some(next);
            persistence.save_schedule(&rule)?;
        }
    }

    Ok(())
}
