// organscope - CLI for two-stage medical image classification

use clap::Parser;
use organscope::{AnalysisError, CandleLoader, Orchestrator, Result, Settings};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Identify the organ in medical images and refine with organ specialists", long_about = None)]
struct Args {
    /// Image files to analyze
    #[arg(required_unless_present_any = ["preload", "status"])]
    images: Vec<PathBuf>,

    /// Configuration file (TOML); defaults to $ORGANSCOPE_CONFIG or ./organscope.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the model files (overrides the config file)
    #[arg(short, long)]
    model_root: Option<PathBuf>,

    /// Force CPU usage (default: use GPU if available)
    #[arg(long)]
    cpu: bool,

    /// Load every configured model before analyzing
    #[arg(long)]
    preload: bool,

    /// Print the model cache state when done
    #[arg(long)]
    status: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (ORGANSCOPE_MODEL_ROOT and friends)
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("organscope={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded .env file from {}", path.display()),
        Err(e) => tracing::debug!(".env file not loaded: {}", e),
    }

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(root) = &args.model_root {
        settings.model_root = root.clone();
    }
    if args.cpu {
        settings.use_cpu = true;
    }
    tracing::info!("Model root: {}", settings.model_root.display());

    let catalog = settings.catalog()?;
    let loader = Arc::new(CandleLoader::new(settings.use_cpu)?);
    let orchestrator = Arc::new(Orchestrator::new(catalog, loader));

    if args.preload {
        tracing::info!("Preloading models");
        let orchestrator = Arc::clone(&orchestrator);
        tokio::task::spawn_blocking(move || orchestrator.registry().warm_up())
            .await
            .map_err(worker_failed)??;
    }

    // Each image runs to completion on its own blocking worker
    let tasks: Vec<_> = args
        .images
        .iter()
        .cloned()
        .map(|path| {
            let orchestrator = Arc::clone(&orchestrator);
            let task = tokio::task::spawn_blocking({
                let path = path.clone();
                move || orchestrator.analyze_file(&path)
            });
            (path, task)
        })
        .collect();

    let mut failures = 0usize;
    for (path, task) in tasks {
        let document = match task.await.map_err(worker_failed)? {
            Ok(response) => json!({
                "image": path.display().to_string(),
                "response": response,
            }),
            Err(e) => {
                failures += 1;
                tracing::error!("{}: {}", path.display(), e);
                json!({
                    "image": path.display().to_string(),
                    "error": e.to_string(),
                    "kind": e.kind(),
                })
            }
        };
        emit(&document, args.pretty)?;
    }

    if args.status {
        emit(&serde_json::to_value(orchestrator.registry().status())?, args.pretty)?;
    }

    if failures > 0 {
        tracing::warn!("{} of {} images failed", failures, args.images.len());
        std::process::exit(1);
    }

    Ok(())
}

fn emit(document: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(document)?
    } else {
        serde_json::to_string(document)?
    };
    println!("{}", text);
    Ok(())
}

fn worker_failed(err: tokio::task::JoinError) -> AnalysisError {
    anyhow::Error::new(err).context("analysis worker failed").into()
}
