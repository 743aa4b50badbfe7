//! Tender pipeline binary
//!
//! Run with: cargo run -p tender-intel --bin tender-pipeline -- --input tenders.json

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tender_intel::{PipelineConfig, TenderPipeline, TenderRecord};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse tender documents and extract semantic tender data
#[derive(Debug, Parser)]
#[command(name = "tender-pipeline", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with one tender record or an array of them
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the processed records (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    skip_documents: bool,

    #[arg(long)]
    skip_semantic: bool,

    #[arg(long)]
    skip_indexing: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tender_intel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            let mut config = PipelineConfig::default();
            config.llm.apply_env();
            config
        }
    };
    config.stages.skip_documents |= args.skip_documents;
    config.stages.skip_semantic |= args.skip_semantic;
    config.stages.skip_indexing |= args.skip_indexing;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Provider: {:?} ({})", config.llm.provider, config.llm.model);
    tracing::info!("  - Context window: {}", config.extraction.context_window);
    tracing::info!("  - Budget policy: {:?}", config.extraction.budget_policy);
    tracing::info!("  - Batch concurrency: {}", config.stages.batch_concurrency);

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", args.input.display()))?;
    let single = !value.is_array();
    let tenders: Vec<TenderRecord> = if single {
        vec![serde_json::from_value(value)?]
    } else {
        serde_json::from_value(value)?
    };
    tracing::info!("Loaded {} tenders from {}", tenders.len(), args.input.display());

    let pipeline = TenderPipeline::from_config(&config)?;
    let processed = pipeline.process_batch(tenders).await;

    let failed = processed.iter().filter(|t| !t.processing_errors.is_empty()).count();
    if failed > 0 {
        tracing::warn!("{} of {} tenders recorded errors", failed, processed.len());
    }

    let json = if single {
        serde_json::to_string_pretty(&processed[0])?
    } else {
        serde_json::to_string_pretty(&processed)?
    };
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {} tenders to {}", processed.len(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
