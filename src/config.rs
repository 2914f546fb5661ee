//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.crop-advisor.toml` files.

use crate::cli::{Args, Command};
use crate::schema::FeatureSchema;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".crop-advisor.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Model artifact settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Feature schema shared by validation and classification.
    #[serde(default)]
    pub schema: FeatureSchema,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for one batch request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Include classifier failure causes in 5xx responses.
    /// Leave off in production.
    #[serde(default)]
    pub expose_internal_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            expose_internal_errors: false,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

/// Model artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact.
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model/crop_model.json")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Command::Serve(serve) => {
                if let Some(ref host) = serve.host {
                    self.server.host = host.clone();
                }
                if let Some(port) = serve.port {
                    self.server.port = port;
                }
                if let Some(timeout) = serve.timeout {
                    self.server.request_timeout_seconds = timeout;
                }
                if let Some(ref model) = serve.model {
                    self.model.path = model.clone();
                }
            }
            Command::Predict(predict) => {
                if let Some(ref model) = predict.model {
                    self.model.path = model.clone();
                }
            }
            Command::Schema | Command::InitConfig => {}
        }
    }

    /// Log level after merging: `--quiet` wins, then `verbose` from
    /// either the file or the command line.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.schema
            .check()
            .context("Invalid [schema] section in configuration")?;

        if self.server.request_timeout_seconds == 0 {
            bail!("server.request_timeout_seconds must be at least 1");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
