//! Promotes indexed blocks once proven and completes relayed withdrawals paid out on L1.
use clap::Parser;
use config::Opts;
use dotenvy::dotenv;
use driver::{Services, run_finalizer};
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

    info!("Finalizer starting...");

    let services = Services::from_opts(&opts).await?;
    runtime::run_job("finalizer", opts.job_interval(), || run_finalizer(&services)).await
}
