use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct HarnessCli {
    /// How often to check for due schedules, in seconds
    #[clap(long, default_value = "60")]
    pub schedule_tick: u64,

    /// Keep created courses and exams after a run instead of deleting them.
    ///
    /// When set, the harness stays subscribed to the target's build queue after a run finishes
    /// so the operator can watch it drain.
    #[clap(long, default_value = "false")]
    pub no_cleanup: bool,

    /// Skip the settle delay between exam preparation and the fan-out phases.
    ///
    /// This is for developing the harness itself; measurements taken in this mode are not
    /// representative.
    #[clap(long, default_value = "false")]
    pub test_mode: bool,

    /// Do not show progress bars during fan-out phases.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at
    /// by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
