use crate::cli::HarnessCli;
use clap::Parser;

/// Initialise the CLI and logging for the cohort runner.
pub fn init() -> HarnessCli {
    env_logger::init();

    HarnessCli::parse()
}
