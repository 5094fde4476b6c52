use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use steinmetz_convert::config::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_PROCESSED_DIR, DEFAULT_RAW_DIR, MAX_COMPRESSION_LEVEL,
};
use steinmetz_convert::{convert_all, WriteOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "steinmetz-convert")]
#[command(about = "Convert raw Steinmetz archives into one Zarr store per session")]
struct Args {
    /// Directory holding the downloaded .npz archives
    #[arg(long, default_value = DEFAULT_RAW_DIR)]
    raw_dir: PathBuf,

    /// Directory the session stores are written to
    #[arg(long, default_value = DEFAULT_PROCESSED_DIR)]
    out_dir: PathBuf,

    /// Gzip level for non-text variables
    #[arg(
        long,
        default_value_t = DEFAULT_COMPRESSION_LEVEL,
        value_parser = clap::value_parser!(u32).range(0..=MAX_COMPRESSION_LEVEL as i64)
    )]
    compression_level: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let options = WriteOptions {
        compression_level: args.compression_level,
    };
    let summary = convert_all(&args.raw_dir, &args.out_dir, &options)?;
    info!(
        archives = summary.archives,
        sessions = summary.outputs.len(),
        dir = %args.out_dir.display(),
        "conversion finished"
    );
    Ok(())
}
