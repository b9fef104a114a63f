//! Fleetguard - operational control plane for HTTP microservices

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use fleetguard::{
    cli::{Cli, Command},
    config::Config,
    http::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load config applying CLI overrides
fn load_config(cli: &Cli) -> Result<Config, fleetguard::Error> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Validate configuration and print a resolved summary
fn check_config(cli: &Cli) -> ExitCode {
    match load_config(cli) {
        Ok(config) => {
            println!("Configuration OK");
            println!("  service:     {} ({})", config.service.name, config.service.environment);
            println!("  listen:      {}:{}", config.server.host, config.server.port);
            println!("  store:       {:?}", config.store.backend);
            println!("  rate limits: {} rule(s)", config.rate_limit.rules.len());
            println!("  flags:       {} bootstrapped", config.flags.bootstrap.len());
            println!(
                "  security:    {}",
                if config.security.enabled { "enabled" } else { "DISABLED" }
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the control-plane server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.service.name,
        port = config.server.port,
        "Starting control plane"
    );

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start control plane: {e}");
            return ExitCode::FAILURE;
        }
    };

    #[cfg(feature = "metrics")]
    let server = match fleetguard::metrics::install_prometheus() {
        Ok(handle) => server.with_prometheus(handle),
        Err(e) => {
            error!("Failed to install metrics recorder: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Control plane error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
