//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operational control plane for HTTP microservices
#[derive(Parser, Debug)]
#[command(name = "fleetguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "FLEETGUARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "FLEETGUARD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FLEETGUARD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FLEETGUARD_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "FLEETGUARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the control-plane server (default)
    Serve,

    /// Validate the configuration and print the resolved summary
    CheckConfig,
}
