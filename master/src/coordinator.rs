use anyhow::Result;
use chrono::Utc;
use common::{JobInfo, JobSpec, JobStatus, PhaseInfo, MAP_PROCEDURE, REDUCE_PROCEDURE};
use futures::{stream, stream::BoxStream, Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::pool::WorkerPool;
use crate::scheduler::{PhaseReport, PhaseScheduler};

/// Una fase con nombre y su flujo de entradas.
pub struct PhasePlan {
    pub procedure: String,
    pub inputs: BoxStream<'static, String>,
}

impl PhasePlan {
    pub fn new<S>(procedure: impl Into<String>, inputs: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        Self {
            procedure: procedure.into(),
            inputs: inputs.boxed(),
        }
    }

    pub fn from_inputs(procedure: impl Into<String>, inputs: Vec<String>) -> Self {
        Self::new(procedure, stream::iter(inputs))
    }
}

/// Dueño del job y del pool: corre las fases en secuencia, cada una recién
/// cuando la anterior convergió.
pub struct Coordinator {
    job: JobSpec,
    scheduler: PhaseScheduler,
    info: Arc<Mutex<JobInfo>>,
}

impl Coordinator {
    pub fn new(job: JobSpec, pool: Arc<WorkerPool>) -> Self {
        let info = Arc::new(Mutex::new(JobInfo::new(job.name.clone())));
        Self {
            job,
            scheduler: PhaseScheduler::new(pool),
            info,
        }
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.scheduler.pool()
    }

    /// Handle compartido del estado del job, para exponerlo por HTTP.
    pub fn info_handle(&self) -> Arc<Mutex<JobInfo>> {
        self.info.clone()
    }

    pub fn job_info(&self) -> JobInfo {
        self.info().clone()
    }

    fn info(&self) -> MutexGuard<'_, JobInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Corre una fase y devuelve cuántas operaciones despachó.
    pub async fn run_phase<S>(&self, procedure: &str, inputs: S) -> usize
    where
        S: Stream<Item = String>,
    {
        self.execute_phase(procedure, inputs).await.operations
    }

    async fn execute_phase<S>(&self, procedure: &str, inputs: S) -> PhaseReport
    where
        S: Stream<Item = String>,
    {
        {
            let mut info = self.info();
            if info.status == JobStatus::Accepted {
                info.status = JobStatus::Running;
                info.started_at = Some(Utc::now());
            }
            info.current_phase = Some(procedure.to_string());
        }

        info!("=== FASE {} ===", procedure.to_uppercase());
        let report = self.scheduler.run_phase(procedure, inputs).await;

        {
            let mut info = self.info();
            info.current_phase = None;
            info.total_operations += report.operations;
            info.retries += report.retries;
            info.phases.push(PhaseInfo {
                procedure: report.procedure.clone(),
                operations: report.operations,
                retries: report.retries,
                elapsed_ms: report.elapsed.as_millis() as u64,
                finished_at: Utc::now(),
            });
        }

        report
    }

    /// Corre una secuencia arbitraria de fases (map, reduce, o más etapas).
    pub async fn run_pipeline(&self, phases: Vec<PhasePlan>) -> Vec<PhaseReport> {
        let mut reports = Vec::with_capacity(phases.len());
        for plan in phases {
            let report = self.execute_phase(&plan.procedure, plan.inputs).await;
            reports.push(report);
        }

        let mut info = self.info();
        if info.status != JobStatus::Failed {
            info.status = JobStatus::Succeeded;
        }
        info.finished_at = Some(Utc::now());
        reports
    }

    /// El job completo: map sobre los archivos de entrada y después reduce
    /// sobre las particiones configuradas. Bloquea hasta que ambas fases
    /// convergen; sin workers, no vuelve nunca.
    pub async fn run(&self) -> Result<JobInfo> {
        let map_inputs = self.job.map_inputs()?;
        let reduce_inputs = self.job.reduce_inputs();

        info!("=== COORDINADOR INICIADO: job {} ===", self.job.name);
        info!(
            "{} operaciones de map, {} de reduce",
            map_inputs.len(),
            reduce_inputs.len()
        );
        if map_inputs.is_empty() {
            warn!("ningún archivo coincide con {}", self.job.input_glob);
        }

        let reports = self
            .run_pipeline(vec![
                PhasePlan::from_inputs(MAP_PROCEDURE, map_inputs),
                PhasePlan::from_inputs(REDUCE_PROCEDURE, reduce_inputs),
            ])
            .await;

        for r in &reports {
            info!(
                "fase {}: {} operaciones, {} reintentos, {:?}",
                r.procedure, r.operations, r.retries, r.elapsed
            );
        }
        info!("=== COORDINADOR TERMINADO ===");

        Ok(self.job_info())
    }

    /// Lo usa quien envuelve `run` con un plazo cuando ese plazo vence.
    pub fn mark_failed(&self, reason: &str) {
        warn!("job {} marcado como FAILED: {}", self.job.name, reason);
        let mut info = self.info();
        info.status = JobStatus::Failed;
        info.current_phase = None;
        info.finished_at = Some(Utc::now());
    }
}
