use serde::{Deserialize, Serialize};

use crate::job::JobLayout;
use crate::operation::OperationId;

pub type WorkerId = String;

/* --------- Registro (worker -> master) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub hostname: String,
    /// URL base con la que el master puede llegar al worker, ej: "http://worker-1:9001"
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
    /// Dónde dejar intermedios y resultados para el job en curso
    pub layout: JobLayout,
}

/* --------- Llamada remota (master -> worker) --------- */

/// Payload de cada llamada a un procedimiento remoto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunArgs {
    pub operation_id: OperationId,
    pub input_locator: String,
}

/// Respuesta vacía: sólo importa si la llamada tuvo éxito o no.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReply {}

/* --------- Métricas expuestas por el master --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Busy,
    Failed,
    Decommissioned,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerMetrics {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub endpoint: String,
    pub state: WorkerState,
    pub registered_secs_ago: u64,
    pub operations_started: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub consecutive_failures: u32,
    pub avg_operation_ms: Option<f64>,
}
