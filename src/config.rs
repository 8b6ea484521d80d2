//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_ISSUER_NAME;
use crate::{Error, Result};

/// Prefix for environment overrides, e.g. `DEVICEGATE_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "DEVICEGATE_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `env:VAR` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Key service configuration
    pub auth: AuthConfig,
    /// CoAP adapter configuration
    pub coap: CoapConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or holds invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(&figment)
    }

    /// Extract and validate from an assembled figment.
    pub(crate) fn extract(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Before validation: `env:` secrets may come from these files.
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Check value constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.trim().is_empty() {
            return Err(Error::Config("auth.secret must not be empty".to_string()));
        }
        if self.auth.issuer_name.is_empty() {
            return Err(Error::Config("auth.issuer_name must not be empty".to_string()));
        }
        if self.auth.login_duration.is_zero() {
            return Err(Error::Config("auth.login_duration must be positive".to_string()));
        }
        if self.auth.reset_duration.is_zero() {
            return Err(Error::Config("auth.reset_duration must be positive".to_string()));
        }
        if self.coap.outbox_capacity == 0 {
            return Err(Error::Config("coap.outbox_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8180,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Key service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token signing secret.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (random per process,
    /// so tokens do not survive a restart)
    pub secret: String,
    /// Issuer name written into login and reset tokens
    pub issuer_name: String,
    /// Lifetime of login keys
    #[serde(with = "humantime_serde")]
    pub login_duration: Duration,
    /// Lifetime of reset keys
    #[serde(with = "humantime_serde")]
    pub reset_duration: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "auto".to_string(),
            issuer_name: DEFAULT_ISSUER_NAME.to_string(),
            login_duration: Duration::from_secs(10 * 60 * 60),
            reset_duration: Duration::from_secs(5 * 60),
        }
    }
}

impl AuthConfig {
    /// Resolve the signing secret (expand `env:`, generate if `auto`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an `env:` variable is unset or empty.
    pub fn resolve_secret(&self) -> Result<String> {
        if self.secret == "auto" {
            let random_bytes: [u8; 32] = rand::random();
            return Ok(base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                random_bytes,
            ));
        }

        if let Some(var_name) = self.secret.strip_prefix("env:") {
            return match env::var(var_name) {
                Ok(value) if !value.is_empty() => Ok(value),
                _ => Err(Error::Config(format!(
                    "auth.secret refers to unset variable {var_name}"
                ))),
            };
        }

        Ok(self.secret.clone())
    }
}

/// CoAP adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoapConfig {
    /// Base URL of the things service used for channel access checks.
    /// Unset means no thing is allowed on any channel.
    pub things_url: Option<String>,
    /// Timeout for access checks
    #[serde(with = "humantime_serde")]
    pub access_timeout: Duration,
    /// Notifications buffered per client session before delivery fails
    pub outbox_capacity: usize,
    /// Messages buffered per in-process broker subscriber
    pub broker_capacity: usize,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            things_url: None,
            access_timeout: Duration::from_secs(5),
            outbox_capacity: 64,
            broker_capacity: 1024,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "100ms", "30s", "5m", "10h")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn from_yaml(yaml: &str) -> Result<Config> {
        Config::extract(&Figment::new().merge(Yaml::string(yaml)))
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.auth.login_duration, Duration::from_secs(36_000));
        assert_eq!(config.auth.reset_duration, Duration::from_secs(300));
        assert_eq!(config.auth.issuer_name, DEFAULT_ISSUER_NAME);
    }

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("10h").unwrap(), Duration::from_secs(36_000));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config = from_yaml(
            r#"
server:
  port: 9000
auth:
  secret: "s3cret"
  login_duration: "2h"
  reset_duration: "90s"
coap:
  things_url: "http://things:8182"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(config.auth.login_duration, Duration::from_secs(7200));
        assert_eq!(config.auth.reset_duration, Duration::from_secs(90));
        assert_eq!(config.coap.things_url.as_deref(), Some("http://things:8182"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = from_yaml("auth:\n  reset_duration: \"0s\"\n").unwrap_err();

        assert!(err.to_string().contains("reset_duration"));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = from_yaml("auth:\n  secret: \"\"\n").unwrap_err();

        assert!(err.to_string().contains("auth.secret"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/devicegate.yaml"))).unwrap_err();

        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn auto_secret_is_random() {
        let auth = AuthConfig::default();

        let a = auth.resolve_secret().unwrap();
        let b = auth.resolve_secret().unwrap();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn literal_secret_is_used_verbatim() {
        let auth = AuthConfig {
            secret: "literal".to_string(),
            ..AuthConfig::default()
        };

        assert_eq!(auth.resolve_secret().unwrap(), "literal");
    }

    #[test]
    fn env_secret_requires_variable() {
        let auth = AuthConfig {
            secret: "env:DEVICEGATE_TEST_UNSET_SECRET_VAR".to_string(),
            ..AuthConfig::default()
        };

        assert!(auth.resolve_secret().is_err());
    }

    #[test]
    fn env_file_provides_secret() {
        // GIVEN: an env file defining the secret variable
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "DEVICEGATE_TEST_ENVFILE_SECRET=from_env_file").unwrap();
        drop(f);

        // WHEN: config references it
        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            auth: AuthConfig {
                secret: "env:DEVICEGATE_TEST_ENVFILE_SECRET".to_string(),
                ..AuthConfig::default()
            },
            ..Default::default()
        };
        config.load_env_files();

        // THEN: it resolves
        // Note: env::remove_var is unsafe in edition 2024 and lib forbids unsafe.
        // Test keys use a unique DEVICEGATE_TEST_ prefix so won't conflict.
        assert_eq!(config.auth.resolve_secret().unwrap(), "from_env_file");
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        // Should not panic
        config.load_env_files();
    }
}
