use common::{JobInfo, JobLayout};
use reqwest::Client;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::pool::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub job: Arc<Mutex<JobInfo>>,
    // se le entrega a cada worker al registrarse
    pub layout: JobLayout,
    // cliente HTTP compartido por todos los endpoints de workers
    pub client: Client,
    pub call_timeout: Duration,
}
