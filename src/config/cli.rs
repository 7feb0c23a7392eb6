use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the multicache binary.
#[derive(Debug, Parser)]
#[command(name = "multicache", version, about = "Request-scoped multi-store cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MULTICACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service with the cache middleware and management API.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the management API.
    #[arg(
        long = "api-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub api_enabled: Option<bool>,

    /// Token required in the management API authorization header.
    #[arg(long = "api-token", env = "MULTICACHE_API_TOKEN", value_name = "TOKEN")]
    pub api_token: Option<String>,

    /// Toggle CDN header emission.
    #[arg(
        long = "cdn-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cdn_enabled: Option<bool>,

    /// Default delay before a tag purge takes effect.
    #[arg(long = "tag-invalidation-delay-seconds", value_name = "SECONDS")]
    pub tag_invalidation_delay_seconds: Option<u64>,
}
