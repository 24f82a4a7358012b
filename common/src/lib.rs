pub mod job;
pub mod operation;
pub mod results;
pub mod wordcount;
pub mod worker;

pub use job::{JobInfo, JobLayout, JobSpec, JobStatus, PhaseInfo};
pub use operation::{Operation, OperationId, MAP_PROCEDURE, REDUCE_PROCEDURE};
pub use results::{append_results, parse_results, read_results, ResultRecord};
pub use worker::{
    RunArgs, RunReply, WorkerId, WorkerMetrics, WorkerRegisterRequest, WorkerRegisterResponse,
    WorkerState,
};

/* --------- Rutas HTTP compartidas entre master y workers --------- */

/// Prefijo de los procedimientos que expone cada worker:
/// `POST {endpoint}/api/v1/procedures/{procedure}`
pub const PROCEDURES_PATH: &str = "/api/v1/procedures";

pub const REGISTER_PATH: &str = "/api/v1/workers/register";
pub const WORKERS_PATH: &str = "/api/v1/workers";
pub const JOB_PATH: &str = "/api/v1/job";
pub const HEALTH_PATH: &str = "/health";

/// URL completa de un procedimiento remoto en un worker.
pub fn procedure_url(endpoint: &str, procedure: &str) -> String {
    format!(
        "{}{}/{}",
        endpoint.trim_end_matches('/'),
        PROCEDURES_PATH,
        procedure
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_url_ignores_trailing_slash() {
        assert_eq!(
            procedure_url("http://w1:9000/", "map"),
            "http://w1:9000/api/v1/procedures/map"
        );
        assert_eq!(
            procedure_url("http://w1:9000", "reduce"),
            "http://w1:9000/api/v1/procedures/reduce"
        );
    }
}
