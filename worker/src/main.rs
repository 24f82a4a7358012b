mod worker;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,tower_http=info,reqwest=info")),
        )
        .init();

    let config = worker::WorkerConfig::parse();
    worker::run(config).await
}
