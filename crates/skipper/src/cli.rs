//! Clap derive structures for the `skipper` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

use skipper_core::{TimeScale, ValueDomain, ValueType};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// skipper -- follow a Signal K server from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "skipper",
    version,
    about = "Follow Signal K servers from the command line",
    long_about = "Connects to a Signal K server the way a dashboard does: discovery,\n\
        streaming with automatic retries, a live path store with alarm zones,\n\
        and sampled time series with moving averages and history backfill.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "SKIPPER_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server URL (overrides profile)
    #[arg(long, short = 's', env = "SKIPPER_SERVER", global = true)]
    pub server: Option<String>,

    /// Bearer token for secured servers
    #[arg(long, env = "SKIPPER_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SKIPPER_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "SKIPPER_INSECURE", global = true)]
    pub insecure: bool,

    /// Discovery timeout in seconds
    #[arg(long, env = "SKIPPER_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that a URL points at a Signal K server
    Validate(ValidateArgs),

    /// Connect and report connection, endpoint and stream status
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Follow live values of one or more paths
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List paths the server has reported
    Paths(PathsArgs),

    /// Follow a sampled time series of one path
    Series(SeriesArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONNECTION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Server base URL (e.g. http://boat.local:3000)
    pub url: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Seconds to wait for a connection (default: the full retry window)
    #[arg(long)]
    pub wait: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DATA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Fully qualified paths (e.g. self.navigation.speedOverGround)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Source to follow ("default" follows whichever source reports first)
    #[arg(long, default_value = "default")]
    pub source: String,

    /// Stop after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PathsArgs {
    /// Only paths whose values have this type
    #[arg(long = "type", short = 't')]
    pub value_type: Option<ValueType>,

    /// Only the own vessel's paths
    #[arg(long)]
    pub self_only: bool,

    /// Seconds to collect deltas before listing
    #[arg(long, default_value = "2")]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct SeriesArgs {
    /// Fully qualified path
    pub path: String,

    /// Source to sample
    #[arg(long, default_value = "default")]
    pub source: String,

    /// last-minute, last-5-minutes, last-30-minutes, <n>min, <n>h or <n>d
    #[arg(long, default_value = "last-5-minutes")]
    pub time_scale: TimeScale,

    /// Statistics domain (direction for angles in radians)
    #[arg(long, default_value = "scalar")]
    pub domain: ValueDomain,

    /// Stop after this many live samples
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Keep the series in the active profile; later runs for the same
    /// path and source resume it
    #[arg(long)]
    pub save: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile
    Init {
        /// Server base URL
        #[arg(long)]
        server: String,

        /// Rewrite advertised service URLs onto the server URL
        #[arg(long)]
        proxy: bool,

        /// Request every path from the server
        #[arg(long)]
        subscribe_all: bool,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// Store a bearer token in the system keyring
    SetToken {
        /// Token value (prompted when omitted)
        #[arg(long)]
        value: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
