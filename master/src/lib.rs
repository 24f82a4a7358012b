pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod health;
pub mod pool;
pub mod remote;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod testing;

pub use coordinator::{Coordinator, PhasePlan};
pub use pool::{FailedWorkers, WorkerPool};
pub use remote::{CallError, HttpEndpoint, RemoteWorker, WorkerEndpoint};
pub use scheduler::{PhaseReport, PhaseScheduler};
