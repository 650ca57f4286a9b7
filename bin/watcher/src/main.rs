//! Ingests new rollup blocks, deposits and withdrawals into the explorer store.
use clap::Parser;
use config::Opts;
use dotenvy::dotenv;
use driver::{Services, run_watcher};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        dotenv().ok();
    }

    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Watcher starting...");

    let services = Services::from_opts(&opts).await?;
    runtime::run_job("watcher", opts.job_interval(), || run_watcher(&services)).await
}
