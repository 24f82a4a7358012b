//! Workers en memoria para los tests del planificador y del pool.

use async_trait::async_trait;
use common::RunArgs;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::remote::{CallError, RemoteWorker, WorkerEndpoint};

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    AlwaysOk,
    AlwaysFail,
    /// Falla las primeras `n` llamadas y después responde bien.
    FailFirst(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Finish { ok: bool },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub worker: String,
    pub procedure: String,
    pub operation_id: u32,
    pub input_locator: String,
    pub kind: EventKind,
}

/// Registro compartido de llamadas, en el orden en que ocurrieron.
#[derive(Default)]
pub struct CallLog {
    events: Mutex<Vec<Event>>,
    overlap: AtomicBool,
}

impl CallLog {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Algún worker atendió dos llamadas a la vez.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Start)
            .collect()
    }

    pub fn successes(&self, procedure: &str) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .events()
            .into_iter()
            .filter(|e| e.procedure == procedure && e.kind == EventKind::Finish { ok: true })
            .map(|e| e.operation_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn failures(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind == EventKind::Finish { ok: false })
            .count()
    }
}

pub struct FakeEndpoint {
    id: String,
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    alive: AtomicBool,
    busy: AtomicBool,
    log: Arc<CallLog>,
}

impl FakeEndpoint {
    /// La sonda responde "ocupado" mientras esté activo.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerEndpoint for FakeEndpoint {
    async fn invoke(&self, procedure: &str, args: &RunArgs) -> Result<(), CallError> {
        let event = |kind| Event {
            worker: self.id.clone(),
            procedure: procedure.to_string(),
            operation_id: args.operation_id,
            input_locator: args.input_locator.clone(),
            kind,
        };

        if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.log.overlap.store(true, Ordering::SeqCst);
        }
        self.log.push(event(EventKind::Start));

        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        let ok = match self.behavior {
            Behavior::AlwaysOk => true,
            Behavior::AlwaysFail => false,
            Behavior::FailFirst(k) => n >= k,
        };

        self.log.push(event(EventKind::Finish { ok }));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if ok {
            Ok(())
        } else {
            Err(CallError::Remote {
                status: 500,
                body: format!("{} falló la llamada {}", self.id, n),
            })
        }
    }

    async fn ping(&self) -> Result<(), CallError> {
        if !self.alive.load(Ordering::SeqCst) {
            Err(CallError::Transport("sin respuesta".to_string()))
        } else if self.busy.load(Ordering::SeqCst) {
            Err(CallError::Busy)
        } else {
            Ok(())
        }
    }

    fn address(&self) -> String {
        format!("fake://{}", self.id)
    }
}

pub fn fake_worker(id: &str, behavior: Behavior) -> (RemoteWorker, Arc<FakeEndpoint>) {
    fake_worker_with(id, behavior, Duration::ZERO, CallLog::shared())
}

pub fn fake_worker_with(
    id: &str,
    behavior: Behavior,
    delay: Duration,
    log: Arc<CallLog>,
) -> (RemoteWorker, Arc<FakeEndpoint>) {
    let endpoint = Arc::new(FakeEndpoint {
        id: id.to_string(),
        behavior,
        delay,
        calls: AtomicUsize::new(0),
        in_flight: AtomicUsize::new(0),
        alive: AtomicBool::new(true),
        busy: AtomicBool::new(false),
        log,
    });
    (RemoteWorker::new(id, endpoint.clone()), endpoint)
}
