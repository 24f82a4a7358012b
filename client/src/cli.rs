use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{read_results, JobInfo, WorkerMetrics, JOB_PATH, WORKERS_PATH};
use reqwest::Client;
use std::collections::HashMap;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master y leer resultados")]
struct Cli {
    /// Igual que en el worker:
    /// - En Docker: MASTER_URL=http://master:8080
    /// - Local: default http://localhost:8080
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:8080", global = true)]
    master_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consulta el estado del job en curso
    Status,

    /// Lista los workers registrados y sus métricas
    Workers,

    /// Lee un archivo de resultados JSONL (las líneas inválidas se ignoran)
    Results {
        #[arg(value_name = "PATH", default_value = "data/result/result-final.jsonl")]
        path: String,

        /// Cuántas claves mostrar, de mayor a menor valor
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
}

/// Claves ordenadas por valor numérico descendente y después por nombre.
/// Los valores no numéricos van al final.
fn top_entries(results: &HashMap<String, String>, n: usize) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = results
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort_by(|a, b| {
        let a_count = a.1.parse::<u64>().ok();
        let b_count = b.1.parse::<u64>().ok();
        b_count.cmp(&a_count).then(a.0.cmp(&b.0))
    });
    entries.truncate(n);
    entries
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.master_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Status => {
            let url = format!("{}{}", base_url, JOB_PATH);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let job: JobInfo = resp.json().await?;
                println!("Job:");
                println!("  nombre: {}", job.name);
                println!("  estado: {:?}", job.status);
                if let Some(ref phase) = job.current_phase {
                    println!("  fase actual: {}", phase);
                }

                println!(
                    "  operaciones: total={}, reintentos={}",
                    job.total_operations, job.retries
                );
                for phase in &job.phases {
                    println!(
                        "    - {}: {} operaciones, {} reintentos, {} ms",
                        phase.procedure, phase.operations, phase.retries, phase.elapsed_ms
                    );
                }

                println!("  submitted_at: {}", job.submitted_at);
                if let Some(ref started) = job.started_at {
                    println!("  iniciado: {}", started);
                }
                if let Some(ref done) = job.finished_at {
                    println!("  finalizado: {}", done);
                }
            } else {
                println!("Error consultando el job (status {})", resp.status());
            }
        }

        Commands::Workers => {
            let url = format!("{}{}", base_url, WORKERS_PATH);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let workers: Vec<WorkerMetrics> = resp.json().await?;
                if workers.is_empty() {
                    println!("No hay workers registrados.");
                } else {
                    for w in workers {
                        println!("Worker {}", w.worker_id);
                        println!("  host           : {}", w.hostname);
                        println!("  endpoint       : {}", w.endpoint);
                        println!("  estado         : {:?}", w.state);
                        println!("  registrado     : {} s ago", w.registered_secs_ago);
                        println!(
                            "  operaciones    : started={}, ok={}, failed={} (seguidas={})",
                            w.operations_started,
                            w.operations_succeeded,
                            w.operations_failed,
                            w.consecutive_failures
                        );
                        if let Some(avg) = w.avg_operation_ms {
                            println!("  avg_op_ms      : {:.1}", avg);
                        } else {
                            println!("  avg_op_ms      : (sin datos)");
                        }
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando {} (status {})",
                    WORKERS_PATH,
                    resp.status()
                );
            }
        }

        Commands::Results { path, top } => {
            let results = read_results(&path)?;
            println!("Resultados en {} ({} claves):", path, results.len());
            for (key, value) in top_entries(&results, top) {
                println!("{}: {}", key, value);
            }
            if results.len() > top {
                println!("... ({} claves más)", results.len() - top);
            }
        }
    }

    Ok(())
}
