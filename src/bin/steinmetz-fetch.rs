use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use steinmetz_convert::config::DEFAULT_RAW_DIR;
use steinmetz_convert::{fetch_all, HttpRetriever, DEFAULT_RESOURCES};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "steinmetz-fetch")]
#[command(about = "Download the raw Steinmetz Neuropixels archives")]
struct Args {
    /// Directory the archives are saved to
    #[arg(short, long, default_value = DEFAULT_RAW_DIR)]
    dest: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let retriever =
        HttpRetriever::new().map_err(|err| anyhow!("cannot build HTTP client: {}", err))?;
    let summary = fetch_all(&DEFAULT_RESOURCES, &args.dest, &retriever)?;
    info!(
        downloaded = summary.downloaded.len(),
        skipped = summary.skipped.len(),
        dir = %args.dest.display(),
        "raw archives ready"
    );
    Ok(())
}
