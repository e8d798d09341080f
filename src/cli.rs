use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "playtrack",
    version,
    about = "Track watched playlist items and reconcile progress against a live page"
)]
pub struct Cli {
    /// SQLite database holding watched sets (defaults to the user data directory).
    #[arg(long, global = true, env = "PLAYTRACK_DB")]
    pub db: Option<PathBuf>,

    /// Keep watch data in memory only; nothing is written to disk.
    #[arg(long, global = true, conflicts_with = "db")]
    pub ephemeral: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "PLAYTRACK_LOG", default_value = "warn")]
    pub log_level: String,

    #[command(flatten)]
    pub tracker: TrackerArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct TrackerArgs {
    /// Quiet period the sampler waits for after the last item-list mutation.
    #[arg(long, global = true, default_value_t = 250)]
    pub debounce_ms: u64,

    /// Upper bound on a single sample before it resolves with the last counts.
    #[arg(long, global = true, default_value_t = 5_000)]
    pub sample_timeout_ms: u64,

    /// Which count is displayed as "watched".
    #[arg(long, global = true, value_enum, default_value_t = WatchedSourceArg::Store)]
    pub watched_source: WatchedSourceArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchedSourceArg {
    /// Items the tracker recorded as watched (durable across sessions).
    Store,
    /// Items the page itself renders with playback progress.
    Host,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a recorded page trace and print every progress update.
    Replay {
        trace: PathBuf,
        /// Sleep through `wait` steps instead of advancing a virtual clock.
        #[arg(long)]
        realtime: bool,
    },
    /// Replay a page trace in real time inside a terminal dashboard.
    Tui { trace: PathBuf },
    /// List playlists with stored watch data.
    List,
    /// Drop stored watch data for one playlist, or everything with --all.
    Reset {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        playlist: Option<String>,
        #[arg(long)]
        all: bool,
    },
}
