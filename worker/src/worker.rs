use anyhow::{bail, Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use common::{
    wordcount, JobLayout, RunArgs, RunReply, WorkerRegisterRequest, WorkerRegisterResponse,
    HEALTH_PATH, MAP_PROCEDURE, PROCEDURES_PATH, REDUCE_PROCEDURE, REGISTER_PATH,
};
use reqwest::Client;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Parser)]
#[command(name = "worker")]
#[command(about = "Worker MapReduce: ejecuta operaciones de map y reduce que le pide el master")]
pub struct WorkerConfig {
    /// URL base del master.
    /// - En Docker: MASTER_URL=http://master:8080
    /// - Local: http://localhost:8080
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:8080")]
    pub master_url: String,

    #[arg(long, env = "WORKER_LISTEN", default_value = "0.0.0.0:50001")]
    pub listen: String,

    /// URL con la que el master llega a este worker (por defecto http://127.0.0.1:<puerto>)
    #[arg(long, env = "WORKER_ADVERTISE")]
    pub advertise: Option<String>,

    /// Intentos de registro antes de rendirse
    #[arg(long, env = "WORKER_REGISTER_ATTEMPTS", default_value_t = 30)]
    pub register_attempts: u32,

    /// Falla a propósito las primeras N operaciones (para probar reintentos)
    #[arg(long, env = "WORKER_FAIL_FIRST", default_value_t = 0)]
    pub fail_first: usize,
}

/// Estado compartido por los handlers del worker.
#[derive(Clone)]
pub struct WorkerCtx {
    layout: Arc<RwLock<Option<JobLayout>>>,
    failures_left: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
}

/// Marca de operación en curso; se libera al soltarla, aunque el master
/// ya haya cortado la llamada por timeout.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl WorkerCtx {
    pub fn new(fail_first: usize) -> Self {
        Self {
            layout: Arc::new(RwLock::new(None)),
            failures_left: Arc::new(AtomicUsize::new(fail_first)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toma la única ranura de ejecución; None si ya hay una operación en curso.
    fn try_begin(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard(self.busy.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_layout(&self, layout: JobLayout) {
        *self.layout.write().unwrap_or_else(|e| e.into_inner()) = Some(layout);
    }

    fn layout(&self) -> Option<JobLayout> {
        self.layout.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// true si esta operación tiene que fallar a propósito
    fn take_injected_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub fn build_router(ctx: WorkerCtx) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(&format!("{}/:name", PROCEDURES_PATH), post(run_procedure))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// 503 mientras haya una operación en curso: el master no debe readmitirlo todavía
async fn health(State(ctx): State<WorkerCtx>) -> (StatusCode, &'static str) {
    if ctx.is_busy() {
        (StatusCode::SERVICE_UNAVAILABLE, "busy")
    } else {
        (StatusCode::OK, "ok")
    }
}

// Ejecuta una operación; 200 = éxito, cualquier otra cosa = falla
async fn run_procedure(
    State(ctx): State<WorkerCtx>,
    Path(name): Path<String>,
    Json(args): Json<RunArgs>,
) -> Result<Json<RunReply>, (StatusCode, String)> {
    let Some(layout) = ctx.layout() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "worker todavía no registrado".to_string(),
        ));
    };

    if name != MAP_PROCEDURE && name != REDUCE_PROCEDURE {
        return Err((
            StatusCode::NOT_FOUND,
            format!("procedimiento desconocido: {}", name),
        ));
    }

    let Some(guard) = ctx.try_begin() else {
        warn!(
            "rechazo operación {} {}: hay otra en curso",
            name, args.operation_id
        );
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "worker ocupado con otra operación".to_string(),
        ));
    };

    info!(
        "tengo operación {} {} (entrada='{}')",
        name, args.operation_id, args.input_locator
    );

    if ctx.take_injected_failure() {
        warn!("falla inyectada en operación {} {}", name, args.operation_id);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "falla inyectada".to_string(),
        ));
    }

    let op_name = name.clone();
    let handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let _guard = guard;
        if op_name == MAP_PROCEDURE {
            wordcount::map_file(args.operation_id, &args.input_locator, &layout)
        } else {
            let keys = wordcount::reduce_partition(args.operation_id, &args.input_locator, &layout)?;
            info!("partición {} reducida: {} claves", args.operation_id, keys);
            Ok(())
        }
    });

    match handle.await {
        Ok(Ok(())) => {
            info!("terminé operación {} correctamente", name);
            Ok(Json(RunReply::default()))
        }
        Ok(Err(e)) => {
            warn!("error procesando operación {}: {:?}", name, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))
        }
        Err(e) => {
            warn!("panic o join error en operación {}: {:?}", name, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Se registra en el master, reintentando mientras el master no responda.
pub async fn register(
    client: &Client,
    master_url: &str,
    request: &WorkerRegisterRequest,
    attempts: u32,
) -> Result<WorkerRegisterResponse> {
    let url = format!("{}{}", master_url.trim_end_matches('/'), REGISTER_PATH);

    for attempt in 1..=attempts.max(1) {
        let result = async {
            let resp = client.post(&url).json(request).send().await?;
            let resp = resp.error_for_status()?;
            Ok::<_, reqwest::Error>(resp.json::<WorkerRegisterResponse>().await?)
        }
        .await;

        match result {
            Ok(ack) => return Ok(ack),
            Err(e) => {
                warn!(
                    "registro en {} falló (intento {}/{}): {}",
                    url, attempt, attempts, e
                );
                if attempt < attempts {
                    sleep(REGISTER_RETRY_DELAY).await;
                }
            }
        }
    }

    bail!("no se pudo registrar en {} tras {} intentos", url, attempts)
}

/// Loop principal del worker:
/// - levanta el servidor de procedimientos
/// - se registra en el master
/// - atiende operaciones hasta que lo maten
pub async fn run(config: WorkerConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.listen))?;
    let port = listener.local_addr()?.port();

    let ctx = WorkerCtx::new(config.fail_first);
    let app = build_router(ctx.clone());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let endpoint = config
        .advertise
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", port));

    let client = Client::new();
    let ack = register(
        &client,
        &config.master_url,
        &WorkerRegisterRequest {
            hostname,
            endpoint: endpoint.clone(),
        },
        config.register_attempts,
    )
    .await?;

    info!(
        "worker {} registrado contra {} (endpoint={}, {} particiones de reduce)",
        ack.worker_id, config.master_url, endpoint, ack.layout.reduce_partitions
    );
    ctx.set_layout(ack.layout);

    server.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::{fs, path::PathBuf};
    use tower::ServiceExt;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("worker_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn layout_in(dir: &PathBuf) -> JobLayout {
        JobLayout {
            work_dir: dir.join("work").to_string_lossy().to_string(),
            reduce_partitions: 2,
            result_path: dir.join("result.jsonl").to_string_lossy().to_string(),
        }
    }

    fn call(procedure: &str, id: u32, locator: &str) -> Request<Body> {
        let body = serde_json::to_vec(&RunArgs {
            operation_id: id,
            input_locator: locator.to_string(),
        })
        .unwrap();
        Request::post(format!("{}/{}", PROCEDURES_PATH, procedure))
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_work_before_registration() {
        let app = build_router(WorkerCtx::new(0));
        let resp = app.oneshot(call("map", 0, "x.txt")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_procedure_is_not_found() {
        let tmp = temp_dir("unknown");
        let ctx = WorkerCtx::new(0);
        ctx.set_layout(layout_in(&tmp));

        let resp = build_router(ctx).oneshot(call("sort", 0, "x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn map_and_reduce_over_http() {
        let tmp = temp_dir("map_reduce");
        let layout = layout_in(&tmp);
        let input = tmp.join("in.txt");
        fs::write(&input, "hola hola mundo").unwrap();

        let ctx = WorkerCtx::new(0);
        ctx.set_layout(layout.clone());
        let app = build_router(ctx);

        let resp = app
            .clone()
            .oneshot(call("map", 0, input.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        for p in 0..2 {
            let resp = app
                .clone()
                .oneshot(call("reduce", p, &layout.work_dir))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let results = common::read_results(&layout.result_path).unwrap();
        assert_eq!(results["hola"], "2");
        assert_eq!(results["mundo"], "1");
    }

    #[tokio::test]
    async fn map_on_missing_input_is_a_failure() {
        let tmp = temp_dir("missing");
        let ctx = WorkerCtx::new(0);
        ctx.set_layout(layout_in(&tmp));

        let resp = build_router(ctx)
            .oneshot(call("map", 0, tmp.join("nope.txt").to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("nope.txt"));
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let tmp = temp_dir("injected");
        let input = tmp.join("in.txt");
        fs::write(&input, "a").unwrap();
        let ctx = WorkerCtx::new(1);
        ctx.set_layout(layout_in(&tmp));
        let app = build_router(ctx);

        let first = app
            .clone()
            .oneshot(call("map", 0, input.to_str().unwrap()))
            .await
            .unwrap();
        let second = app
            .oneshot(call("map", 0, input.to_str().unwrap()))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn busy_worker_rejects_second_operation() {
        let tmp = temp_dir("busy");
        let input = tmp.join("in.txt");
        fs::write(&input, "a").unwrap();
        let ctx = WorkerCtx::new(0);
        ctx.set_layout(layout_in(&tmp));
        let app = build_router(ctx.clone());

        let health = |app: Router| async move {
            app.oneshot(Request::get(HEALTH_PATH).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
        };

        let running = ctx.try_begin().expect("ranura libre");
        assert!(ctx.try_begin().is_none());

        let resp = app
            .clone()
            .oneshot(call("map", 1, input.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health(app.clone()).await, StatusCode::SERVICE_UNAVAILABLE);

        drop(running);
        assert_eq!(health(app.clone()).await, StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(call("map", 1, input.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!ctx.is_busy());
    }

    #[tokio::test]
    async fn injected_failure_frees_the_slot() {
        let tmp = temp_dir("injected_slot");
        let ctx = WorkerCtx::new(1);
        ctx.set_layout(layout_in(&tmp));

        let resp = build_router(ctx.clone())
            .oneshot(call("map", 0, "x.txt"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!ctx.is_busy());
    }

    #[tokio::test]
    async fn register_returns_master_ack() {
        let layout = layout_in(&temp_dir("register"));
        let ack_layout = layout.clone();
        let master = Router::new().route(
            REGISTER_PATH,
            post(move |Json(req): Json<WorkerRegisterRequest>| {
                let layout = ack_layout.clone();
                async move {
                    assert_eq!(req.endpoint, "http://127.0.0.1:1");
                    Json(WorkerRegisterResponse {
                        worker_id: "w-1".to_string(),
                        layout,
                    })
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, master).await.unwrap() });

        let ack = register(
            &Client::new(),
            &format!("http://{}", addr),
            &WorkerRegisterRequest {
                hostname: "h".to_string(),
                endpoint: "http://127.0.0.1:1".to_string(),
            },
            3,
        )
        .await
        .unwrap();

        assert_eq!(ack.worker_id, "w-1");
        assert_eq!(ack.layout, layout);
    }

    #[tokio::test]
    async fn register_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let res = register(
            &Client::new(),
            &format!("http://{}", addr),
            &WorkerRegisterRequest {
                hostname: "h".to_string(),
                endpoint: "http://127.0.0.1:1".to_string(),
            },
            1,
        )
        .await;
        assert!(res.is_err());
    }
}
