use async_trait::async_trait;
use common::{procedure_url, RunArgs, WorkerId, HEALTH_PATH};
use reqwest::{Client, StatusCode};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// Cualquier falla de una llamada remota. El planificador las trata todas igual:
/// la operación se reencola y el worker pasa a manos del chequeo de salud.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("error de transporte: {0}")]
    Transport(String),
    #[error("la llamada excedió {0:?}")]
    Timeout(Duration),
    #[error("el worker respondió {status}: {body}")]
    Remote { status: u16, body: String },
    /// La sonda respondió, pero el worker sigue ejecutando una operación anterior.
    #[error("el worker sigue ocupado")]
    Busy,
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        CallError::Transport(e.to_string())
    }
}

/// Capacidad de hablar con un worker concreto.
#[async_trait]
pub trait WorkerEndpoint: Send + Sync {
    /// Ejecuta `procedure` con `args` y espera a que termine.
    async fn invoke(&self, procedure: &str, args: &RunArgs) -> Result<(), CallError>;

    /// Sonda de vida, usada para decidir si un worker caído vuelve al pool.
    /// `CallError::Busy` si responde pero todavía no está libre.
    async fn ping(&self) -> Result<(), CallError>;

    /// Dirección legible, sólo para logs y métricas.
    fn address(&self) -> String;
}

/// Endpoint HTTP: `POST {base}/api/v1/procedures/{procedure}` con `RunArgs` en JSON.
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
    call_timeout: Duration,
}

impl HttpEndpoint {
    pub fn new(client: Client, base_url: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl WorkerEndpoint for HttpEndpoint {
    async fn invoke(&self, procedure: &str, args: &RunArgs) -> Result<(), CallError> {
        let url = procedure_url(&self.base_url, procedure);
        let resp = self
            .client
            .post(&url)
            .timeout(self.call_timeout)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(self.call_timeout)
                } else {
                    CallError::from(e)
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(CallError::Remote {
            status: status.as_u16(),
            body,
        })
    }

    async fn ping(&self) -> Result<(), CallError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), HEALTH_PATH);
        let resp = self
            .client
            .get(&url)
            .timeout(self.call_timeout)
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else if resp.status() == StatusCode::SERVICE_UNAVAILABLE {
            Err(CallError::Busy)
        } else {
            Err(CallError::Remote {
                status: resp.status().as_u16(),
                body: String::new(),
            })
        }
    }

    fn address(&self) -> String {
        self.base_url.clone()
    }
}

/// Un worker remoto visto desde el master.
///
/// No implementa `Clone`: quien lo tiene es el único que puede usarlo, y sólo
/// vuelve al pool mediante `release` o `report_failed`.
pub struct RemoteWorker {
    id: WorkerId,
    endpoint: Arc<dyn WorkerEndpoint>,
}

impl RemoteWorker {
    pub fn new(id: impl Into<WorkerId>, endpoint: Arc<dyn WorkerEndpoint>) -> Self {
        Self {
            id: id.into(),
            endpoint,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> String {
        self.endpoint.address()
    }

    /// Una llamada, sin reintentos: reintentar es trabajo del planificador.
    pub async fn call(&self, procedure: &str, args: &RunArgs) -> Result<(), CallError> {
        self.endpoint.invoke(procedure, args).await
    }

    pub async fn ping(&self) -> Result<(), CallError> {
        self.endpoint.ping().await
    }
}

impl fmt::Debug for RemoteWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteWorker")
            .field("id", &self.id)
            .field("address", &self.endpoint.address())
            .finish()
    }
}
