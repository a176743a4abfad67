use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pressroomd")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PRESSROOM_GIT_SHA"), ")"))]
#[command(about = "Publishes scheduled content and delivers scheduled notifications.")]
pub(crate) struct Cli {
    /// Path to pressroom.toml (default: $PRESSROOM_CONFIG, then ~/.pressroom/pressroom.toml)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Run the scheduler loop until Ctrl+C or SIGTERM (the default).
    Run,
    /// Run a single tick now, print its report as JSON, and exit.
    Tick,
    /// List unpublished content scheduled for the future, soonest first.
    Upcoming {
        /// Maximum number of items to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}
