use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::pool::{FailedWorkers, WorkerPool};
use crate::remote::{CallError, RemoteWorker};

pub const DEFAULT_PROBE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Espera antes de sondear a un worker que acaba de fallar
    pub probe_delay: Duration,
    /// Fallas seguidas tras las cuales el worker se da de baja sin sondear
    pub max_consecutive_failures: u32,
    /// Cuánto se espera a que un worker ocupado (p.ej. tras un timeout) quede libre
    pub busy_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_millis(DEFAULT_PROBE_DELAY_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Readmitted,
    Decommissioned,
}

/// Loop de salud: atiende cada worker que falló una operación y decide si
/// vuelve al pool o se da de baja. Termina cuando el pool desaparece.
pub async fn run_health_loop(pool: Arc<WorkerPool>, mut failed: FailedWorkers, policy: HealthPolicy) {
    while let Some(worker) = failed.recv().await {
        let pool = pool.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            check_worker(&pool, worker, &policy).await;
        });
    }
    info!("loop de salud terminado");
}

/// Una pasada sobre un worker caído:
/// 1. si ya acumuló demasiadas fallas seguidas, baja
/// 2. si no, lo sondea cada `probe_delay`; vuelve al pool sólo cuando responde
///    libre. Mientras siga ocupado se lo vuelve a sondear, hasta `busy_timeout`.
pub async fn check_worker(pool: &WorkerPool, worker: RemoteWorker, policy: &HealthPolicy) -> Verdict {
    let failures = pool.consecutive_failures(worker.id());
    if failures >= policy.max_consecutive_failures {
        warn!(
            "worker {} acumuló {} fallas seguidas (máximo {})",
            worker.id(),
            failures,
            policy.max_consecutive_failures
        );
        pool.decommission(worker);
        return Verdict::Decommissioned;
    }

    let started = Instant::now();
    loop {
        sleep(policy.probe_delay).await;

        match worker.ping().await {
            Ok(()) => {
                info!(
                    "worker {} responde tras {} falla(s), vuelve al pool",
                    worker.id(),
                    failures
                );
                pool.readmit(worker);
                return Verdict::Readmitted;
            }
            Err(CallError::Busy) if started.elapsed() < policy.busy_timeout => {
                debug!("worker {} sigue con una operación anterior", worker.id());
            }
            Err(e) => {
                warn!("worker {} no responde a la sonda: {}", worker.id(), e);
                pool.decommission(worker);
                return Verdict::Decommissioned;
            }
        }
    }
}
