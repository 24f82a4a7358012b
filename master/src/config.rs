use clap::Parser;
use common::JobSpec;
use std::time::Duration;

use crate::health::{
    HealthPolicy, DEFAULT_BUSY_TIMEOUT_SECS, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_PROBE_DELAY_MS,
};

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Configuración del master. Cada flag se puede dar también por variable de entorno.
#[derive(Debug, Clone, Parser)]
#[command(name = "master")]
#[command(about = "Coordinador MapReduce: reparte operaciones de map y reduce entre workers remotos")]
pub struct MasterConfig {
    /// Dirección donde escucha la API (registro de workers, estado)
    #[arg(long, env = "MASTER_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    #[arg(long, env = "JOB_NAME", default_value = "wordcount")]
    pub name: String,

    /// Patrón de archivos de entrada; cada archivo es una operación de map
    #[arg(long = "input", env = "INPUT_GLOB", value_name = "GLOB")]
    pub input_glob: String,

    /// Cantidad de operaciones de reduce
    #[arg(
        long = "reduce-jobs",
        env = "REDUCE_JOBS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub reduce_jobs: u32,

    /// Directorio de intermedios, compartido con los workers
    #[arg(long, env = "WORK_DIR", default_value = "data/tmp")]
    pub work_dir: String,

    #[arg(long, env = "RESULT_PATH", default_value = "data/result/result-final.jsonl")]
    pub result_path: String,

    /// Plazo de cada llamada remota
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = DEFAULT_CALL_TIMEOUT_SECS)]
    pub call_timeout_secs: u64,

    #[arg(long, env = "PROBE_DELAY_MS", default_value_t = DEFAULT_PROBE_DELAY_MS)]
    pub probe_delay_ms: u64,

    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
    pub max_consecutive_failures: u32,

    /// Espera máxima a que un worker ocupado quede libre antes de darlo de baja
    #[arg(long, env = "BUSY_TIMEOUT_SECS", default_value_t = DEFAULT_BUSY_TIMEOUT_SECS)]
    pub busy_timeout_secs: u64,

    /// Plazo total del job; sin él, el master espera lo que haga falta
    #[arg(long, env = "JOB_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Seguir sirviendo la API después de terminar el job
    #[arg(long, env = "MASTER_LINGER")]
    pub linger: bool,
}

impl MasterConfig {
    pub fn job_spec(&self) -> JobSpec {
        JobSpec {
            name: self.name.clone(),
            input_glob: self.input_glob.clone(),
            reduce_partitions: self.reduce_jobs,
            work_dir: self.work_dir.clone(),
            result_path: self.result_path.clone(),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            probe_delay: Duration::from_millis(self.probe_delay_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
