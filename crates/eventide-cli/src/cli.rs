use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "eventide")]
#[command(about = "Manage events offline and sync them when the server is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Event API base URL (overrides config and EVENTIDE_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Bearer token for the event API (overrides config and EVENTIDE_API_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Treat the network as down: `sync` is skipped and changes stay queued
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an event locally and queue it for sync
    #[command(alias = "new")]
    Add {
        /// Event title
        #[arg(required = true)]
        title: Vec<String>,
        /// Start time (RFC 3339, `YYYY-MM-DD HH:MM`, `YYYY-MM-DD` or Unix ms)
        #[arg(long, value_name = "TIME")]
        starts_at: Option<String>,
        /// End time (same formats as --starts-at)
        #[arg(long, value_name = "TIME")]
        ends_at: Option<String>,
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        capacity: Option<u32>,
    },
    /// List events (falls back to the local cache when offline)
    List {
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Events per page (defaults to the configured page size)
        #[arg(short, long)]
        limit: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one event by local or server id
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an event locally and queue the change
    Edit {
        /// Local or server id
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_name = "TIME")]
        starts_at: Option<String>,
        #[arg(long, value_name = "TIME")]
        ends_at: Option<String>,
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        capacity: Option<u32>,
    },
    /// Delete an event (queued until the next sync)
    Delete {
        /// Local or server id
        id: String,
    },
    /// Push queued changes to the server now
    Sync {
        /// Output the drain report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status and record counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset a queued mutation's retries and send it now
    Retry {
        /// Queue item id (see `eventide queue`)
        item_id: String,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Show or update the CLI configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Wipe cached events, queued changes and conflicts
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts, newest first
    List {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Conflict id
        id: String,
        #[arg(long, value_enum)]
        strategy: ResolveStrategy,
    },
    /// Resolve every open conflict with one strategy
    Auto {
        #[arg(long, value_enum)]
        strategy: AutoStrategy,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write values to the configuration file
    ///
    /// Takes the global `--api-url`, `--token` and `--db-path` flags.
    Init {
        /// Request timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
        /// Default page size for `list`
        #[arg(long)]
        page_size: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveStrategy {
    /// Keep the local edits and overwrite the server
    Local,
    /// Discard local edits and take the server copy
    Server,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum AutoStrategy {
    Local,
    Server,
    /// Leave every conflict for manual resolution
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
