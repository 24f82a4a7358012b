use common::{WorkerId, WorkerMetrics, WorkerState};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::Instant,
};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::remote::RemoteWorker;

/// Lo que el master sabe de cada worker registrado.
#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub address: String,
    pub state: WorkerState,
    pub registered_at: Instant,
    pub busy_since: Option<Instant>,

    // Métricas
    pub operations_started: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub consecutive_failures: u32,
    pub total_operation_ms: u64,
}

/// Extremo receptor de los workers que fallaron una operación.
/// Lo consume el chequeo de salud (ver `health`).
pub struct FailedWorkers {
    rx: mpsc::UnboundedReceiver<RemoteWorker>,
}

impl FailedWorkers {
    pub async fn recv(&mut self) -> Option<RemoteWorker> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RemoteWorker> {
        self.rx.try_recv().ok()
    }
}

/// Pool de workers de un coordinador.
///
/// Un worker está en exactamente uno de estos lugares: la cola de ociosos,
/// en manos de un intento en vuelo (`Busy`), o fuera del pool (`Failed` /
/// `Decommissioned`). `acquire_idle` lo saca de la cola y sólo `release`,
/// `readmit` o `report_failed` lo devuelven.
pub struct WorkerPool {
    idle: Mutex<VecDeque<RemoteWorker>>,
    idle_notify: Notify,
    registry: Mutex<HashMap<WorkerId, WorkerMeta>>,
    failed_tx: mpsc::UnboundedSender<RemoteWorker>,
}

impl WorkerPool {
    pub fn new() -> (Self, FailedWorkers) {
        let (failed_tx, rx) = mpsc::unbounded_channel();
        let pool = Self {
            idle: Mutex::new(VecDeque::new()),
            idle_notify: Notify::new(),
            registry: Mutex::new(HashMap::new()),
            failed_tx,
        };
        (pool, FailedWorkers { rx })
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerMeta>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn idle_queue(&self) -> MutexGuard<'_, VecDeque<RemoteWorker>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, id: &str, state: WorkerState) {
        if let Some(meta) = self.registry().get_mut(id) {
            meta.state = state;
        }
    }

    fn push_idle(&self, worker: RemoteWorker) {
        self.set_state(worker.id(), WorkerState::Idle);
        self.idle_queue().push_back(worker);
        self.idle_notify.notify_one();
    }

    /// Alta de un worker nuevo: queda ocioso y disponible para despachar.
    pub fn register(&self, worker: RemoteWorker, hostname: impl Into<String>) {
        let id = worker.id().to_string();
        let hostname = hostname.into();
        {
            let mut registry = self.registry();
            if registry.contains_key(&id) {
                warn!("worker {} ya estaba registrado, se ignora el alta duplicada", id);
                return;
            }
            registry.insert(
                id.clone(),
                WorkerMeta {
                    hostname: hostname.clone(),
                    address: worker.address(),
                    state: WorkerState::Idle,
                    registered_at: Instant::now(),
                    busy_since: None,
                    operations_started: 0,
                    operations_succeeded: 0,
                    operations_failed: 0,
                    consecutive_failures: 0,
                    total_operation_ms: 0,
                },
            );
        }

        info!("worker registrado: {} ({} en {})", id, hostname, worker.address());
        self.push_idle(worker);
    }

    /// Saca un worker ocioso si lo hay, sin esperar.
    pub fn try_acquire_idle(&self) -> Option<RemoteWorker> {
        let worker = self.idle_queue().pop_front()?;

        let mut registry = self.registry();
        if let Some(meta) = registry.get_mut(worker.id()) {
            if meta.state != WorkerState::Idle {
                error!(
                    "worker {} salió de la cola de ociosos en estado {:?}",
                    worker.id(),
                    meta.state
                );
            }
            meta.state = WorkerState::Busy;
            meta.busy_since = Some(Instant::now());
            meta.operations_started += 1;
        }
        Some(worker)
    }

    /// Espera hasta que haya un worker ocioso. Si nunca se registra ninguno,
    /// espera para siempre: sin worker no hay operación que pueda correr.
    pub async fn acquire_idle(&self) -> RemoteWorker {
        loop {
            if let Some(worker) = self.try_acquire_idle() {
                return worker;
            }
            debug!("sin workers ociosos, esperando...");
            self.idle_notify.notified().await;
        }
    }

    fn finish_operation(&self, id: &str, success: bool) {
        let mut registry = self.registry();
        if let Some(meta) = registry.get_mut(id) {
            if let Some(since) = meta.busy_since.take() {
                meta.total_operation_ms += since.elapsed().as_millis() as u64;
            }
            if success {
                meta.operations_succeeded += 1;
                meta.consecutive_failures = 0;
            } else {
                meta.operations_failed += 1;
                meta.consecutive_failures += 1;
            }
        }
    }

    /// Devuelve a la cola un worker que terminó bien su operación.
    pub fn release(&self, worker: RemoteWorker) {
        self.finish_operation(worker.id(), true);
        self.push_idle(worker);
    }

    /// Un worker falló: no vuelve a la cola, pasa al canal de caídos.
    pub fn report_failed(&self, worker: RemoteWorker) {
        self.finish_operation(worker.id(), false);
        self.set_state(worker.id(), WorkerState::Failed);

        if let Err(mpsc::error::SendError(worker)) = self.failed_tx.send(worker) {
            warn!(
                "nadie atiende workers caídos, se da de baja {}",
                worker.id()
            );
            self.set_state(worker.id(), WorkerState::Decommissioned);
        }
    }

    /// Un worker caído que volvió a responder regresa a la cola.
    pub fn readmit(&self, worker: RemoteWorker) {
        info!("worker {} readmitido en el pool", worker.id());
        self.push_idle(worker);
    }

    /// Baja definitiva: el worker no recibe más operaciones.
    pub fn decommission(&self, worker: RemoteWorker) {
        warn!("worker {} dado de baja", worker.id());
        self.set_state(worker.id(), WorkerState::Decommissioned);
    }

    pub fn idle_count(&self) -> usize {
        self.idle_queue().len()
    }

    pub fn registered_count(&self) -> usize {
        self.registry().len()
    }

    pub fn state_of(&self, id: &str) -> Option<WorkerState> {
        self.registry().get(id).map(|m| m.state)
    }

    pub fn consecutive_failures(&self, id: &str) -> u32 {
        self.registry()
            .get(id)
            .map(|m| m.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn meta(&self, id: &str) -> Option<WorkerMeta> {
        self.registry().get(id).cloned()
    }

    pub fn metrics(&self) -> Vec<WorkerMetrics> {
        let registry = self.registry();
        let mut out: Vec<WorkerMetrics> = registry
            .iter()
            .map(|(id, meta)| {
                let finished = meta.operations_succeeded + meta.operations_failed;
                let avg_ms = if finished > 0 {
                    Some(meta.total_operation_ms as f64 / finished as f64)
                } else {
                    None
                };

                WorkerMetrics {
                    worker_id: id.clone(),
                    hostname: meta.hostname.clone(),
                    endpoint: meta.address.clone(),
                    state: meta.state,
                    registered_secs_ago: meta.registered_at.elapsed().as_secs(),
                    operations_started: meta.operations_started,
                    operations_succeeded: meta.operations_succeeded,
                    operations_failed: meta.operations_failed,
                    consecutive_failures: meta.consecutive_failures,
                    avg_operation_ms: avg_ms,
                }
            })
            .collect();
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        out
    }
}
