//! devicegate - key service and CoAP observer core

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use devicegate::{
    auth::{InMemoryKeyRepository, Key, KeyService, KeyType, UuidIdentityProvider, issue_time},
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Login { identity }) => run_login(&config, &identity).await,
        Some(Command::Identify { token }) => run_identify(&config, &token).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Key service for one-shot commands. Stateless key types only, so the
/// repository is never consulted.
fn offline_keys(config: &Config) -> Option<KeyService> {
    if config.auth.secret == "auto" {
        warn!("auth.secret is 'auto' - set a fixed secret for tokens a server will accept");
    }
    match KeyService::from_config(
        Arc::new(InMemoryKeyRepository::new()),
        Arc::new(UuidIdentityProvider::new()),
        &config.auth,
    ) {
        Ok(svc) => Some(svc),
        Err(e) => {
            error!("Failed to create key service: {e}");
            None
        }
    }
}

/// Issue a login key
async fn run_login(config: &Config, identity: &str) -> ExitCode {
    let Some(keys) = offline_keys(config) else {
        return ExitCode::FAILURE;
    };

    let mut request = Key::new(KeyType::Login);
    request.issued_at = issue_time();
    match keys.issue(identity, request).await {
        Ok(key) => {
            println!("{}", key.secret);
            if let Some(exp) = key.expires_at {
                eprintln!("expires at {}", exp.to_rfc3339());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to issue login key: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Resolve a token to its identity
async fn run_identify(config: &Config, token: &str) -> ExitCode {
    let Some(keys) = offline_keys(config) else {
        return ExitCode::FAILURE;
    };

    match keys.identify(token).await {
        Ok(identity) => {
            println!("{identity}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting devicegate"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
