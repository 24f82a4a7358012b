use common::{Operation, OperationId};
use futures::{Stream, StreamExt};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pool::WorkerPool;
use crate::remote::RemoteWorker;

/// Resultado de una fase que convergió.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub procedure: String,
    /// Operaciones distintas despachadas (los reintentos no suman)
    pub operations: usize,
    pub retries: usize,
    pub elapsed: Duration,
}

/// Lo que cada intento le manda al planificador al terminar.
/// Si falló, la operación viaja en el mismo mensaje que avisa que terminó,
/// así nunca se ve "cero en vuelo" sin ver también el reintento pendiente.
#[derive(Debug)]
enum AttemptOutcome {
    Succeeded(OperationId),
    Failed(Operation),
}

/// Estado de una fase en curso. Sólo lo toca el planificador.
struct PhaseRun {
    inbox: mpsc::UnboundedReceiver<AttemptOutcome>,
    inbox_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outstanding: usize,
    pending: VecDeque<Operation>,
    retries: usize,
}

impl PhaseRun {
    fn new() -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            inbox,
            inbox_tx,
            outstanding: 0,
            pending: VecDeque::new(),
            retries: 0,
        }
    }

    fn absorb(&mut self, outcome: AttemptOutcome) {
        self.outstanding -= 1;
        match outcome {
            AttemptOutcome::Succeeded(id) => {
                debug!("operación {} confirmada ({} en vuelo)", id, self.outstanding);
            }
            AttemptOutcome::Failed(op) => self.pending.push_back(op),
        }
    }

    /// Siguiente operación fallida, sin bloquear.
    fn next_pending(&mut self) -> Option<Operation> {
        while let Ok(outcome) = self.inbox.try_recv() {
            self.absorb(outcome);
        }
        self.pending.pop_front()
    }

    /// Barrera: espera a que termine todo intento lanzado hasta ahora.
    async fn drain(&mut self) {
        while self.outstanding > 0 {
            match self.inbox.recv().await {
                Some(outcome) => self.absorb(outcome),
                // No pasa: `inbox_tx` vive mientras viva la fase
                None => break,
            }
        }
    }
}

/// Despacha las operaciones de una fase al pool y reintenta las que fallan
/// hasta que no quede ninguna en vuelo ni pendiente.
#[derive(Clone)]
pub struct PhaseScheduler {
    pool: Arc<WorkerPool>,
}

impl PhaseScheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Corre una fase completa. `inputs` es finito y se consume una sola vez;
    /// cada elemento se convierte en una operación con el siguiente id.
    ///
    /// No tiene límite de reintentos ni de tiempo: si el pool se queda sin
    /// workers, espera indefinidamente.
    pub async fn run_phase<S>(&self, procedure: &str, inputs: S) -> PhaseReport
    where
        S: Stream<Item = String>,
    {
        let started = Instant::now();
        let mut run = PhaseRun::new();
        let mut inputs = std::pin::pin!(inputs);

        info!("planificando operaciones de {}", procedure);

        // 1) Despacho inicial: una operación por entrada
        let mut dispatched: OperationId = 0;
        while let Some(input) = inputs.next().await {
            let op = Operation::new(procedure, dispatched, input);
            dispatched += 1;

            let worker = self.pool.acquire_idle().await;
            self.launch(&mut run, worker, op);
        }

        // 2) Barrera
        run.drain().await;

        // 3) Reintentar hasta que una ronda completa no reintente nada
        let mut round_retries = 0;
        loop {
            if let Some(op) = run.next_pending() {
                info!(
                    "re-ejecutando operación fallida {} {} (intento {})",
                    op.procedure, op.id, op.attempt
                );
                let worker = self.pool.acquire_idle().await;
                self.launch(&mut run, worker, op);
                round_retries += 1;
                run.retries += 1;
                continue;
            }

            debug!("esperando a que terminen las operaciones reintentadas");
            run.drain().await;

            if round_retries == 0 {
                break;
            }
            round_retries = 0;
        }

        let report = PhaseReport {
            procedure: procedure.to_string(),
            operations: dispatched as usize,
            retries: run.retries,
            elapsed: started.elapsed(),
        };
        info!(
            "{}x operaciones de {} completadas ({} reintentos, {:?})",
            report.operations, procedure, report.retries, report.elapsed
        );
        report
    }

    fn launch(&self, run: &mut PhaseRun, worker: RemoteWorker, op: Operation) {
        run.outstanding += 1;
        let pool = self.pool.clone();
        let inbox = run.inbox_tx.clone();
        tokio::spawn(run_attempt(pool, worker, op, inbox));
    }
}

/// Un intento: llamar al worker y devolverlo al pool según el resultado.
async fn run_attempt(
    pool: Arc<WorkerPool>,
    worker: RemoteWorker,
    op: Operation,
    inbox: mpsc::UnboundedSender<AttemptOutcome>,
) {
    info!(
        "ejecutando {} (id={} entrada='{}' worker={})",
        op.procedure,
        op.id,
        op.input_locator,
        worker.id()
    );

    let outcome = match worker.call(&op.procedure, &op.run_args()).await {
        Ok(()) => {
            pool.release(worker);
            AttemptOutcome::Succeeded(op.id)
        }
        Err(e) => {
            warn!(
                "operación {} {} falló en worker {}: {}",
                op.procedure,
                op.id,
                worker.id(),
                e
            );
            pool.report_failed(worker);
            AttemptOutcome::Failed(op.retry())
        }
    };

    if inbox.send(outcome).is_err() {
        error!("el planificador ya no escucha resultados de intentos");
    }
}
