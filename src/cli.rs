//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// crop-advisor - majority-vote crop recommendation
///
/// Scores up to ten soil/climate samples with a pre-trained model and
/// recommends the crop most of them agree on.
///
/// Examples:
///   crop-advisor serve --model model/crop_model.json --port 8000
///   crop-advisor predict --input samples.json --model model/crop_model.json
///   crop-advisor predict --input samples.json --server http://localhost:8000 --format json
///   crop-advisor schema
///   crop-advisor init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .crop-advisor.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the batch prediction HTTP API
    Serve(ServeArgs),

    /// Recommend a crop for a batch of samples read from a JSON file
    Predict(PredictArgs),

    /// Print the active feature schema
    Schema,

    /// Generate a default .crop-advisor.toml configuration file
    InitConfig,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind (default: from config or 0.0.0.0)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (default: from config or 8000)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to the model artifact
    #[arg(short, long, value_name = "FILE", env = "CROP_ADVISOR_MODEL")]
    pub model: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PredictArgs {
    /// JSON file holding `{"samples": [...]}` or a bare array of samples
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Send the batch to a running server instead of scoring locally
    #[arg(
        short,
        long,
        value_name = "URL",
        env = "CROP_ADVISOR_SERVER",
        conflicts_with = "model"
    )]
    pub server: Option<String>,

    /// Path to the model artifact for local scoring
    #[arg(short, long, value_name = "FILE", env = "CROP_ADVISOR_MODEL")]
    pub model: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Timeout for remote requests in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub timeout: u64,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Serve(serve) => {
                if serve.timeout == Some(0) {
                    return Err("Timeout must be at least 1 second".to_string());
                }
                if serve.port == Some(0) {
                    return Err("Port must be between 1 and 65535".to_string());
                }
            }
            Command::Predict(predict) => {
                if let Some(ref server) = predict.server {
                    if !server.starts_with("http://") && !server.starts_with("https://") {
                        return Err("Server URL must start with 'http://' or 'https://'".to_string());
                    }
                }
                if predict.timeout == 0 {
                    return Err("Timeout must be at least 1 second".to_string());
                }
                if !predict.input.is_file() {
                    return Err(format!(
                        "Input file does not exist: {}",
                        predict.input.display()
                    ));
                }
            }
            Command::Schema | Command::InitConfig => {}
        }

        Ok(())
    }
}
