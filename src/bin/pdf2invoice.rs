//! CLI binary for pdf2invoice.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2invoice::{submit, InputDocument, PipelineConfig, SubmitOutput};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Structure one invoice (pretty JSON to stdout)
  pdf2invoice invoice.pdf

  # A whole batch, machine-readable
  pdf2invoice --json scans/*.pdf > results.json

  # Slower service day: poll for up to ten minutes
  pdf2invoice --poll-deadline 600 invoice.pdf

ENVIRONMENT VARIABLES:
  MINERU_API_TOKEN   Extraction-service bearer token (required)
  MINERU_API_BASE    Extraction-service base URL
  ZHIPU_API_KEY      Structuring-service API key (required)
  ZHIPU_API_BASE     Structuring-service base URL
  ZHIPU_MODEL        Structuring model id (default: glm-4-flash)

SETUP:
  1. export MINERU_API_TOKEN=...
  2. export ZHIPU_API_KEY=...
  3. pdf2invoice invoice.pdf
"#;

/// Structure Chinese medical e-invoice PDFs into typed JSON records.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2invoice",
    version,
    about = "Structure medical e-invoice PDFs into typed JSON records",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice PDF files to submit as one batch.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Structuring model id.
    #[arg(long, env = "ZHIPU_MODEL")]
    model: Option<String>,

    /// Seconds between batch status polls.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Wall-clock deadline for the poll phase, in seconds.
    #[arg(long, default_value_t = 300)]
    poll_deadline: u64,

    /// Bounded fan-out for per-document work.
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Emit the full result set as one JSON document instead of
    /// per-document lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env().context(
        "pipeline configuration incomplete; set MINERU_API_TOKEN and ZHIPU_API_KEY",
    )?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    config.poll_interval_secs = cli.poll_interval;
    config.poll_deadline_secs = cli.poll_deadline;
    config.concurrency = cli.concurrency.max(1);

    let mut documents = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let bytes = std::fs::read(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .with_context(|| format!("'{}' has no usable file name", path.display()))?;
        documents.push(InputDocument::new(name, bytes));
    }

    let output = submit(documents, &config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output)?;
    }

    if output.stats.structured == 0 {
        anyhow::bail!("no document produced a structured record");
    }
    Ok(())
}

fn print_summary(output: &SubmitOutput) -> Result<()> {
    for result in &output.results {
        match (&result.invoice, &result.error) {
            (Some(invoice), _) => {
                println!(
                    "✓ {}  {}",
                    result.file_name,
                    serde_json::to_string(invoice)?
                );
            }
            (None, Some(error)) => {
                println!("✗ {}  {error}", result.file_name);
            }
            (None, None) => unreachable!("result slot with neither invoice nor error"),
        }
    }
    eprintln!(
        "{}/{} structured in {:.1}s",
        output.stats.structured,
        output.stats.total_documents,
        output.stats.total_duration_ms as f64 / 1000.0
    );
    Ok(())
}
