//! WorksheetToolkit - Deterministic measurement tools for worksheet images
//!
//! Reads areas, deviations, fractions and counts off synthetic diagram
//! images using explicit pixel arithmetic, with OCR only for numeric
//! labels.

mod config;
mod error;
mod ocr;
mod storage;
mod tools;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::ocr::{OcrWorkerPool, PoolConfig, RecognizerBackend, TesseractBackend, UnavailableBackend};
use crate::tools::{BlobArgs, DeviationArgs, ImageArgs, ToolCall, ToolContext};
use crate::vision::ImageCrateCodec;

/// WorksheetToolkit - Worksheet image measurement tools
#[derive(Parser, Debug)]
#[command(name = "worksheet-toolkit")]
#[command(about = "Deterministic area, deviation, fraction and blob measurements from worksheet images")]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "debug")
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Tesseract executable (overrides the configured one)
    #[arg(long, global = true)]
    tesseract: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer newline-delimited JSON tool calls on stdin
    Serve,
    /// Area of the green polygon in purple label units
    PolygonArea(ImageArgs),
    /// Average of red population and green sample standard deviations
    DeviationAverage(DeviationArgs),
    /// Read stacked fractions from dark ink
    FractionBars(ImageArgs),
    /// Count blobs of one marker color
    CountBlobs(BlobArgs),
    /// Write the effective configuration to a file and exit
    WriteConfig {
        /// Destination (defaults to the per-user config.toml)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for tool results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_or_create_config(),
    };

    if let Command::WriteConfig { path } = &args.command {
        let path = match path {
            Some(path) => path.clone(),
            None => storage::default_config_path()?,
        };
        config::save_config(&config, &path).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Configuration written to {:?}", path);
        return Ok(());
    }

    let ctx = build_context(config, args.tesseract.as_deref());

    let call = match args.command {
        Command::Serve => {
            let stdin = std::io::stdin();
            return tools::serve(&ctx, stdin.lock(), std::io::stdout().lock());
        }
        Command::PolygonArea(a) => ToolCall::SolveGreenPolygonAreaFromImage(a),
        Command::DeviationAverage(a) => ToolCall::SolveRedGreenDeviationAverageFromImage(a),
        Command::FractionBars(a) => ToolCall::SolveFractionBarsFromImage(a),
        Command::CountBlobs(a) => ToolCall::CountColorBlobsFromImage(a),
        Command::WriteConfig { .. } => return Ok(()),
    };

    match tools::dispatch(&ctx, &call) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&tools::error_result(&e))?);
            warn!("{} failed: {}", call.name(), e);
            std::process::exit(1);
        }
    }
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring unreadable configuration: {:#}", e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

/// Select the recognizer once and wire the shared services
fn build_context(config: AppConfig, tesseract: Option<&Path>) -> ToolContext {
    let binary = tesseract.unwrap_or(config.ocr.tesseract_bin.as_path());
    let backend: Arc<dyn RecognizerBackend> = match TesseractBackend::detect(binary) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            warn!("OCR disabled: {}", e);
            let reason = match e {
                EngineError::RecognitionUnavailable(reason) => reason,
                other => other.to_string(),
            };
            Arc::new(UnavailableBackend::new(reason))
        }
    };

    let pool = OcrWorkerPool::new(backend, PoolConfig::from(&config.ocr));
    ToolContext::new(Arc::new(ImageCrateCodec::new()), Arc::new(pool), config)
}
