//! crop-advisor - majority-vote crop recommendation
//!
//! Scores a batch of up to ten soil/climate samples with a pre-trained
//! random-forest model and recommends the crop most samples agree on,
//! either over HTTP (`serve`) or from the command line (`predict`).
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, model loading, connection, etc.)
//!   2 - The batch was rejected (empty, too large or invalid samples)

mod analysis;
mod classifier;
mod cli;
mod client;
mod config;
mod error;
mod models;
mod report;
mod schema;
mod server;

use analysis::BatchAggregator;
use anyhow::{Context, Result};
use chrono::Utc;
use classifier::ForestClassifier;
use cli::{Args, Command, OutputFormat, PredictArgs};
use config::{Config, DEFAULT_CONFIG_FILE};
use error::AggregationError;
use indicatif::{ProgressBar, ProgressStyle};
use models::{BatchRequest, BatchResponse, RawSample};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Load and merge configuration; it carries the verbosity
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(config.log_level(args.quiet));

    info!("crop-advisor v{}", env!("CARGO_PKG_VERSION"));
    origin.log();
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("crop-advisor failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .crop-advisor.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to change the model path, server port or feature ranges.");
    Ok(())
}

/// Initialize logging at the resolved level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the selected command. Returns the process exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    config.validate()?;

    match &args.command {
        Command::Serve(_) => run_server(&config).await,
        Command::Predict(predict) => run_predict(&config, predict, args.quiet).await,
        Command::Schema => {
            print_schema(&config);
            Ok(0)
        }
        Command::InitConfig => handle_init_config().map(|_| 0),
    }
}

/// Load the model once and build the shared aggregator.
///
/// Returns the aggregator together with the model version.
fn build_aggregator(config: &Config) -> Result<(BatchAggregator, String)> {
    info!("Loading model from {}", config.model.path.display());
    let classifier = ForestClassifier::load(&config.model.path)?;
    let version = classifier.version().to_string();

    let aggregator = BatchAggregator::new(config.schema.clone(), Arc::new(classifier))
        .context("Model and feature schema are incompatible")?;
    Ok((aggregator, version))
}

async fn run_server(config: &Config) -> Result<i32> {
    let (aggregator, model_version) = build_aggregator(config)?;
    let aggregator = Arc::new(aggregator);

    println!("🌾 Crop recommendation API");
    println!(
        "   Model: {} ({})",
        config.model.path.display(),
        model_version
    );
    println!(
        "   Schema: {} ({})",
        config.schema.version,
        config.schema.field_names().join(", ")
    );
    println!("   Listening: http://{}", config.server.bind_address());

    let state = server::AppState::new(aggregator, &config.server);
    server::serve(state, &config.server).await?;
    Ok(0)
}

async fn run_predict(config: &Config, args: &PredictArgs, quiet: bool) -> Result<i32> {
    let samples = read_samples(&args.input)?;
    info!(
        "Read {} samples from {}",
        samples.len(),
        args.input.display()
    );

    let (source, response) = match args.server {
        Some(ref url) => {
            let client = client::RemoteClient::new(url, args.timeout)?;
            let spinner = spinner(quiet, "Prediction in progress...");
            let outcome = client.predict_batch(samples).await;
            spinner.finish_and_clear();
            (url.clone(), outcome?)
        }
        None => {
            let (aggregator, model_version) = build_aggregator(config)?;
            match aggregator.aggregate(&samples) {
                Ok(result) => (
                    format!("{} ({})", config.model.path.display(), model_version),
                    BatchResponse::from(result),
                ),
                Err(e) if e.is_caller_error() => {
                    eprintln!("\n⛔ {}", describe_rejection(&e));
                    return Ok(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let report = report::Report {
        generated_at: Utc::now(),
        source,
        response,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "✅ Recommended crop: {} ({:.1}% of {} samples). Report saved to: {}",
                report.response.recommended_crop,
                report.response.confidence * 100.0,
                report.response.total_samples,
                path.display()
            );
        }
        None => println!("{}", output),
    }

    Ok(0)
}

fn print_schema(config: &Config) {
    println!("Feature schema {}", config.schema.version);
    println!("{:<4} {:<14} {}", "#", "field", "allowed range");
    for (i, field) in config.schema.fields.iter().enumerate() {
        println!("{:<4} {:<14} {}", i + 1, field.name, field.range());
    }
}

fn spinner(quiet: bool, message: &'static str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Either `{"samples": [...]}` or a bare array of samples.
#[derive(Deserialize)]
#[serde(untagged)]
enum SampleFile {
    Wrapped(BatchRequest),
    Bare(Vec<RawSample>),
}

/// Read a batch of samples from a JSON file.
fn read_samples(path: &Path) -> Result<Vec<RawSample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    parse_samples(&content).with_context(|| format!("Invalid samples file: {}", path.display()))
}

fn parse_samples(content: &str) -> Result<Vec<RawSample>> {
    let parsed: SampleFile = serde_json::from_str(content)
        .context("expected {\"samples\": [...]} or an array of sample objects")?;
    Ok(match parsed {
        SampleFile::Wrapped(request) => request.samples,
        SampleFile::Bare(samples) => samples,
    })
}

/// One line for the rejection, one per violated constraint.
fn describe_rejection(error: &AggregationError) -> String {
    let mut lines = vec![error.to_string()];
    if let AggregationError::BatchValidation(rejections) = error {
        for rejection in rejections {
            for violation in &rejection.violations {
                lines.push(format!("   sample {}: {}", rejection.index + 1, violation));
            }
        }
    }
    lines.join("\n")
}

/// Where the configuration came from. Logged once logging is up.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    BuiltIn,
    /// The default file exists but could not be loaded.
    Fallback(String),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => info!("Loaded default config from {}", DEFAULT_CONFIG_FILE),
            ConfigOrigin::BuiltIn => debug!("No config file found, using defaults"),
            ConfigOrigin::Fallback(e) => warn!("Failed to load config: {}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    Ok(match Config::load_default() {
        Ok(Some(config)) => (config, ConfigOrigin::DefaultFile),
        Ok(None) => (Config::default(), ConfigOrigin::BuiltIn),
        Err(e) => (Config::default(), ConfigOrigin::Fallback(format!("{:#}", e))),
    })
}
