//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// devicegate - key service and CoAP observer core for IoT messaging
#[derive(Parser, Debug)]
#[command(name = "devicegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DEVICEGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DEVICEGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DEVICEGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "DEVICEGATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DEVICEGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the key service server (default)
    Serve,

    /// Issue a login key for an identity that has passed primary
    /// authentication. Needs a fixed `auth.secret` to be useful to a server.
    Login {
        /// Identity (e.g. an email address)
        #[arg(required = true)]
        identity: String,
    },

    /// Resolve a login or reset key to its identity
    Identify {
        /// The token to check
        #[arg(required = true)]
        token: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["devicegate", "--port", "9000"]).unwrap();

        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn login_takes_identity() {
        let cli = Cli::try_parse_from(["devicegate", "login", "user@example.com"]).unwrap();

        assert!(matches!(cli.command, Some(Command::Login { identity }) if identity == "user@example.com"));
    }

    #[test]
    fn login_requires_identity() {
        assert!(Cli::try_parse_from(["devicegate", "login"]).is_err());
    }
}
