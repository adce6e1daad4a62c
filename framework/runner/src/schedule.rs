use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// How often a schedule fires. A weekly cycle carries the weekday it fires on, so a weekly
/// rule without a weekday is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCycle {
    Daily,
    Weekly(Weekday),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSubscriber {
    pub email: String,
    pub unsubscribe_key: String,
}

/// A recurrence definition that auto-queues a new run of a definition whenever it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: String,
    pub definition_id: String,
    pub cycle: ScheduleCycle,
    /// Time of day (UTC) the rule fires at.
    pub time_of_day: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Recomputed after every fire or edit. A rule whose next fire falls after [ScheduleRule::ends_at]
    /// is deleted rather than rescheduled.
    pub next_fire: Option<DateTime<Utc>>,
    pub subscribers: Vec<ScheduleSubscriber>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("end time {end} is before start time {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("end time {0} is already in the past")]
    EndInPast(DateTime<Utc>),
}

impl ScheduleRule {
    /// Enforced at rule creation and update. The remaining invariants of the original design
    /// (start, cycle, time of day, and the weekly weekday being present) hold by construction.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if let Some(end) = self.ends_at {
            if end < self.starts_at {
                return Err(ScheduleError::EndBeforeStart {
                    start: self.starts_at,
                    end,
                });
            }
            if end < now {
                return Err(ScheduleError::EndInPast(end));
            }
        }
        Ok(())
    }
}

/// Compute when `rule` should next fire, relative to `now`.
///
/// The search origin is the rule's start if that is still in the future, otherwise `now`. The
/// candidate is the rule's time of day on the origin's date, advanced by the cycle if it has
/// already passed. Callers must delete the rule instead of rescheduling it when the result
/// falls after the rule's end.
pub fn next_fire(rule: &ScheduleRule, now: DateTime<Utc>) -> DateTime<Utc> {
    let origin = if rule.starts_at > now {
        rule.starts_at
    } else {
        now
    };

    let candidate = origin.date_naive().and_time(rule.time_of_day).and_utc();

    match rule.cycle {
        ScheduleCycle::Daily => {
            if candidate < origin {
                candidate + TimeDelta::days(1)
            } else {
                candidate
            }
        }
        ScheduleCycle::Weekly(weekday) => {
            if origin.weekday() == weekday && candidate >= origin {
                candidate
            } else {
                // Strictly after the origin: the same weekday means a full week ahead.
                let days_ahead = (weekday.num_days_from_monday() + 7
                    - origin.weekday().num_days_from_monday())
                    % 7;
                let days_ahead = if days_ahead == 0 { 7 } else { days_ahead };
                candidate + TimeDelta::days(days_ahead as i64)
            }
        }
    }
}
