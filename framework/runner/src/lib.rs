mod cli;
mod config;
mod dispatcher;
mod driver;
mod executor;
mod init;
mod model;
mod monitor;
mod observer;
mod orchestrator;
mod persistence;
mod progress;
mod queue;
mod schedule;
mod schedule_driver;
mod types;

pub mod prelude {
    pub use cohort_core::prelude::*;
    pub use cohort_instruments::{
        aggregate, print_summary, CategoryStats, RequestCategory, RequestSample, RunStats,
        TimeBucket,
    };

    pub use crate::cli::HarnessCli;
    pub use crate::config::OrchestratorConfig;
    pub use crate::dispatcher::{concurrency_limit, run_all, UnitOfWork, DEFAULT_FANOUT_FACTOR};
    pub use crate::driver::{AdminActions, DriverFactory, ParticipantActions, PreparationStatus};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::model::{
        AuthMechanism, AuthMechanismMix, CiStatus, Credentials, DefinitionError, ExerciseKind,
        LogEntry, Run, RunStatus, SimulationDefinition, SimulationMode, MAX_LOG_MESSAGE_LEN,
    };
    pub use crate::observer::{NoopObserver, RunObserver};
    pub use crate::orchestrator::RunOrchestrator;
    pub use crate::persistence::Persistence;
    pub use crate::queue::RunQueue;
    pub use crate::schedule::{
        next_fire, ScheduleCycle, ScheduleError, ScheduleRule, ScheduleSubscriber,
    };
    pub use crate::schedule_driver::{start_schedule_driver, tick};
    pub use crate::types::HarnessResult;
}
