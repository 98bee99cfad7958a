use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::ExecutionContext;

/// Command-line arguments for the gazette binary.
#[derive(Debug, Parser)]
#[command(name = "gazette", version, about = "Gazette article cache administration")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "GAZETTE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run article cache maintenance on the configured cadence.
    Maintain(MaintainArgs),
    /// Print adapter statistics as JSON.
    Stats,
    /// Drop every entry carrying any of the given tags.
    Invalidate(InvalidateArgs),
    /// Remove entries, optionally only those whose key starts with a prefix.
    Clear(ClearArgs),
    /// Print a cached article, looked up by id or slug, as JSON.
    Article(ArticleArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct MaintainArgs {
    /// Run a single pass and exit.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub once: bool,

    /// Override the maintenance cadence.
    #[arg(long = "cadence-seconds", value_name = "SECONDS")]
    pub cadence_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    /// Tag to invalidate; repeat for several.
    #[arg(long = "tag", value_name = "TAG", required = true, num_args = 1..)]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ClearArgs {
    /// Only remove keys starting with this prefix.
    #[arg(long, value_name = "PREFIX")]
    pub pattern: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ArticleArgs {
    /// Article id or slug.
    #[arg(value_name = "ID_OR_SLUG")]
    pub identifier: String,
}

/// Overrides applied on top of files and environment.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the execution context.
    #[arg(long = "context", value_enum, value_name = "CONTEXT", global = true)]
    pub context: Option<ExecutionContext>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the remote store host.
    #[arg(long = "remote-host", value_name = "HOST", global = true)]
    pub remote_host: Option<String>,

    /// Override the remote store port.
    #[arg(long = "remote-port", value_name = "PORT", global = true)]
    pub remote_port: Option<u16>,

    /// Override the remote database index.
    #[arg(long = "remote-db", value_name = "INDEX", global = true)]
    pub remote_db: Option<i64>,

    /// Surface remote failures instead of degrading to misses.
    #[arg(
        long = "remote-strict",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub remote_strict: Option<bool>,

    /// Override the local SQLite database name.
    #[arg(long = "local-database", value_name = "NAME", global = true)]
    pub local_database: Option<String>,

    /// Override the local storage quota.
    #[arg(long = "local-quota-bytes", value_name = "BYTES", global = true)]
    pub local_quota_bytes: Option<u64>,
}
