//! Clap derive structures for the `plantsip` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use plantsip_core::WaterAmountMode;

// ── Top-Level CLI ────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "plantsip",
    version,
    about = "Set up, monitor and water PlantSip appliances",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "PLANTSIP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
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

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// One identifier per line
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add an appliance (interactive unless every answer is given as a flag)
    Setup(SetupArgs),

    /// List or remove configured appliances
    #[command(alias = "dev")]
    Devices(DevicesArgs),

    /// Replace the API key of a configured appliance, keeping its id
    Reauth(ReauthArgs),

    /// Refresh and show appliance status
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Water one channel now
    Water(WaterArgs),

    /// Change a channel's configured water amount
    SetAmount(SetAmountArgs),

    /// Poll every appliance until interrupted, printing events
    Watch(WatchArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Setup ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// Use the default PlantSip server
    #[arg(long, conflicts_with = "host")]
    pub default_server: bool,

    /// Custom server URL
    #[arg(long)]
    pub host: Option<String>,

    /// Authenticate with an existing API key
    #[arg(long, env = "PLANTSIP_API_KEY", hide_env_values = true, conflicts_with = "username")]
    pub api_key: Option<String>,

    /// Authenticate with account credentials
    #[arg(long)]
    pub username: Option<String>,

    /// Account password (prompted when omitted)
    #[arg(long, env = "PLANTSIP_PASSWORD", hide = true, requires = "username")]
    pub password: Option<String>,

    /// Server device id or name, when the account has several appliances
    #[arg(long)]
    pub device: Option<String>,
}

// ── Reauth ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReauthArgs {
    /// Device id or unique prefix
    pub device: String,

    /// New API key
    #[arg(long, env = "PLANTSIP_API_KEY", hide_env_values = true, conflicts_with = "username")]
    pub api_key: Option<String>,

    /// Request a new API key with account credentials
    #[arg(long)]
    pub username: Option<String>,

    /// Account password (prompted when omitted)
    #[arg(long, env = "PLANTSIP_PASSWORD", hide = true, requires = "username")]
    pub password: Option<String>,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List configured appliances
    #[command(alias = "ls")]
    List,

    /// Forget an appliance and its stored API key
    #[command(alias = "rm")]
    Remove {
        /// Device id or unique prefix
        device: String,
    },
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Device id or unique prefix (all devices when omitted)
    pub device: Option<String>,

    /// Shorthand for `--output json`
    #[arg(long)]
    pub json: bool,
}

// ── Water / set-amount ───────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WaterArgs {
    /// Device id or unique prefix
    pub device: String,

    #[arg(long, short = 'c')]
    pub channel: u32,

    /// Amount in millilitres
    #[arg(long, short = 'a')]
    pub amount: u32,
}

#[derive(Debug, Args)]
pub struct SetAmountArgs {
    /// Device id or unique prefix
    pub device: String,

    #[arg(long, short = 'c')]
    pub channel: u32,

    /// Which configured amount to change
    #[arg(long, short = 'm', value_enum)]
    pub mode: AmountMode,

    /// Amount in millilitres
    #[arg(long, short = 'a')]
    pub amount: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AmountMode {
    Manual,
    Automatic,
}

impl From<AmountMode> for WaterAmountMode {
    fn from(mode: AmountMode) -> Self {
        match mode {
            AmountMode::Manual => Self::Manual,
            AmountMode::Automatic => Self::Automatic,
        }
    }
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Override the poll interval (e.g. "30s", "5m")
    #[arg(long)]
    pub interval: Option<humantime::Duration>,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: clap_complete::Shell,
}
