use clap::Parser;
use mef_fields::pipeline::{run_with_summary, RunSummary};
use mef_fields::runtime::archive::{download_and_extract, ScratchDir};
use mef_fields::runtime::config::ExtractConfig;
use mef_fields::runtime::fetcher::HttpFetcher;
use std::path::PathBuf;

/// Extract form field definitions from IRS MeF stylesheets
#[derive(Debug, Parser)]
#[command(name = "mef-fields")]
#[command(version)]
struct Args {
    /// JSON config file (falls back to $MEF_CONFIG, then defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tax year to extract
    #[arg(long)]
    year: Option<i32>,

    /// Output directory for form JSON and _index.json
    #[arg(long)]
    out: Option<PathBuf>,

    /// Already extracted package directory; skips the download
    #[arg(long)]
    source: Option<PathBuf>,

    /// Package file name on the schema server
    #[arg(long)]
    zip: Option<String>,

    /// Parallel stylesheet workers
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn resolve_config(&self) -> Result<ExtractConfig, String> {
        let mut config = match &self.config {
            Some(path) => ExtractConfig::load_from_file(path)?,
            None => ExtractConfig::load_default()?,
        };
        if let Some(year) = self.year {
            config.tax_year = year;
        }
        if let Some(out) = &self.out {
            config.output_dir = Some(out.clone());
        }
        if let Some(zip) = &self.zip {
            config.zip_name = Some(zip.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        Ok(config)
    }
}

async fn run_cli(args: Args) -> Result<RunSummary, String> {
    let config = args.resolve_config()?;

    if let Some(source) = &args.source {
        let (_, summary) = run_with_summary(&config.pipeline_config(source)).await?;
        return Ok(summary);
    }

    let scratch = ScratchDir::new()?;
    let fetcher = HttpFetcher::with_default_client()?;
    download_and_extract(&fetcher, &config.download_url(), scratch.path()).await?;

    let result = run_with_summary(&config.pipeline_config(scratch.path())).await;
    let cleanup = scratch.cleanup();
    let (_, summary) = result?;
    cleanup?;
    Ok(summary)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    match run_cli(args).await {
        Ok(summary) => {
            tracing::info!(
                "[Extract] Done: {} files, {} forms written, skipped {:?}",
                summary.files_discovered,
                summary.forms_written,
                summary.skipped
            );
        }
        Err(err) => {
            tracing::error!("[Extract] Run failed: {}", err);
            std::process::exit(1);
        }
    }
}
