use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use footnote_stitch::pipeline::footnotes::StitchEvent;
use footnote_stitch::pipeline::rewriting::LlmClient;
use footnote_stitch::{init_tracing, PipelineConfig, StitchRunner};

#[derive(Parser, Debug)]
#[command(name = "stitch")]
#[command(version, about = "Inline cross-page footnote definitions into extracted document text")]
struct Cli {
    /// Plain-text document, as extracted from the source PDF.
    input: PathBuf,
    /// JSON pipeline config; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the JSON result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    ollama_url: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(url) = cli.ollama_url {
        config.ollama_url = url;
    }
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }

    let raw_text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;

    let runner = StitchRunner::new(config)?;
    let rewriter = runner.ollama_rewriter()?;
    match rewriter.client().is_model_available(rewriter.model()) {
        Ok(true) => {}
        Ok(false) => tracing::warn!(model = rewriter.model(), "Model not listed by Ollama"),
        Err(e) => tracing::warn!(error = %e, "Cannot reach Ollama, batches will pass through"),
    }

    let progress = |event: StitchEvent| {
        if let StitchEvent::BatchCompleted { batch_index, pass_through } = event {
            eprintln!(
                "[batch {batch_index}] {}",
                if pass_through { "passed through" } else { "rewritten" }
            );
        }
    };
    let output = runner.run_with(&raw_text, &rewriter, Some(&progress), None)?;

    let json = serde_json::to_string_pretty(&output)?;
    match &cli.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }

    let card = output.report.scorecard;
    eprintln!(
        "Stitch complete. batches={} passed_through={} footnotes={} completeness={}% chunks={}",
        output.report.batch_count,
        output.report.pass_through_batches,
        card.total,
        card.completeness_pct,
        output.report.chunk_count
    );

    Ok(())
}
