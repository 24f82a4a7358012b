use anyhow::{bail, Context, Result};
use clap::Parser;
use common::JobStatus;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use master::{
    config::MasterConfig, handlers, health, state::AppState, Coordinator, WorkerPool,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let config = MasterConfig::parse();
    let job = config.job_spec();

    // Resultados e intermedios de una corrida anterior no se mezclan con los nuevos
    job.reset_outputs()?;

    let (pool, failed) = WorkerPool::new();
    let pool = Arc::new(pool);
    let coordinator = Coordinator::new(job.clone(), pool.clone());

    let state = AppState {
        pool: pool.clone(),
        job: coordinator.info_handle(),
        layout: job.layout(),
        client: reqwest::Client::new(),
        call_timeout: config.call_timeout(),
    };

    // router HTTP
    let app = handlers::build_router(state);
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.listen))?;
    info!("master escuchando en {}", listener.local_addr()?);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // chequeo de salud de workers caídos en segundo plano
    tokio::spawn(health::run_health_loop(
        pool.clone(),
        failed,
        config.health_policy(),
    ));

    let outcome = match config.job_timeout() {
        Some(limit) => match tokio::time::timeout(limit, coordinator.run()).await {
            Ok(res) => res,
            Err(_) => {
                coordinator.mark_failed(&format!("el job excedió {:?}", limit));
                Ok(coordinator.job_info())
            }
        },
        None => coordinator.run().await,
    };

    let info = match outcome {
        Ok(info) => info,
        Err(e) => {
            coordinator.mark_failed(&e.to_string());
            return Err(e);
        }
    };

    info!(
        "job {} terminó en estado {:?}: {} operaciones, {} reintentos, resultados en {}",
        info.name, info.status, info.total_operations, info.retries, job.result_path
    );

    if config.linger {
        info!("sigo sirviendo la API (--linger)");
        server.await??;
    }

    if info.status == JobStatus::Failed {
        error!("el job no convergió a tiempo");
        bail!("job {} terminó en estado {:?}", info.name, info.status);
    }

    Ok(())
}
