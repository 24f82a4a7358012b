use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{fs, io::ErrorKind, path::Path};

/// Descripción del job: qué leer, cuántos reduce y dónde escribir.
/// No cambia una vez que empieza la planificación.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,

    /// Patrón de archivos de entrada, ej: "files/chunks/*.txt".
    /// Cada archivo es una operación de map.
    pub input_glob: String,

    /// Cantidad de operaciones de reduce (particiones intermedias)
    pub reduce_partitions: u32,

    /// Directorio de intermedios compartido con los workers
    pub work_dir: String,

    /// Archivo JSONL de resultados finales
    pub result_path: String,
}

impl JobSpec {
    /// Entradas de la fase map, en orden estable.
    pub fn map_inputs(&self) -> Result<Vec<String>> {
        let paths = glob(&self.input_glob)
            .with_context(|| format!("patrón input_glob inválido: {}", self.input_glob))?;

        let mut inputs = Vec::new();
        for entry in paths {
            let path = entry.context("no se pudo leer una entrada del glob")?;
            if path.is_file() {
                inputs.push(path.to_string_lossy().to_string());
            }
        }
        inputs.sort();
        Ok(inputs)
    }

    /// Entradas de la fase reduce: una por partición.
    /// El id de operación (0..reduce_partitions) es la partición a reducir.
    pub fn reduce_inputs(&self) -> Vec<String> {
        (0..self.reduce_partitions)
            .map(|_| self.work_dir.clone())
            .collect()
    }

    /// Deja el disco listo para una corrida nueva: borra el resultado y los
    /// intermedios de corridas anteriores y recrea el directorio de trabajo.
    /// El reduce suma todo `map-*-{p}.jsonl` del directorio, así que restos
    /// viejos inflarían los conteos.
    pub fn reset_outputs(&self) -> Result<()> {
        if let Err(e) = fs::remove_file(&self.result_path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(e).with_context(|| format!("no se pudo limpiar {}", self.result_path));
            }
        }
        if Path::new(&self.work_dir).exists() {
            fs::remove_dir_all(&self.work_dir)
                .with_context(|| format!("no se pudo vaciar {}", self.work_dir))?;
        }
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("no se pudo crear {}", self.work_dir))?;
        Ok(())
    }

    pub fn layout(&self) -> JobLayout {
        JobLayout {
            work_dir: self.work_dir.clone(),
            reduce_partitions: self.reduce_partitions,
            result_path: self.result_path.clone(),
        }
    }
}

/// Lo que un worker necesita saber del job para ejecutar operaciones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLayout {
    pub work_dir: String,
    pub reduce_partitions: u32,
    pub result_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub procedure: String,
    pub operations: usize,
    pub retries: usize,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub status: JobStatus,

    /// Fase en ejecución, si hay alguna
    pub current_phase: Option<String>,
    /// Fases ya convergidas, en orden
    pub phases: Vec<PhaseInfo>,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_operations: usize,
    pub retries: usize,
}

impl JobInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Accepted,
            current_phase: None,
            phases: Vec::new(),
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_operations: 0,
            retries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_results, wordcount};
    use std::path::PathBuf;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("job_spec_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn spec_for(dir: &PathBuf, reduce_partitions: u32) -> JobSpec {
        JobSpec {
            name: "wordcount".to_string(),
            input_glob: format!("{}/*.txt", dir.display()),
            reduce_partitions,
            work_dir: dir.join("work").to_string_lossy().to_string(),
            result_path: dir.join("result.jsonl").to_string_lossy().to_string(),
        }
    }

    #[test]
    fn map_inputs_are_sorted_files_only() {
        let tmp = temp_dir("map_inputs");
        fs::write(tmp.join("b.txt"), "b").unwrap();
        fs::write(tmp.join("a.txt"), "a").unwrap();
        fs::create_dir_all(tmp.join("dir.txt")).unwrap();
        fs::write(tmp.join("ignored.csv"), "x").unwrap();

        let inputs = spec_for(&tmp, 2).map_inputs().unwrap();

        let names: Vec<String> = inputs
            .iter()
            .map(|p| PathBuf::from(p).file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn map_inputs_empty_when_nothing_matches() {
        let tmp = temp_dir("no_inputs");
        assert!(spec_for(&tmp, 2).map_inputs().unwrap().is_empty());
    }

    #[test]
    fn map_inputs_rejects_invalid_pattern() {
        let mut spec = spec_for(&temp_dir("bad_glob"), 1);
        spec.input_glob = "[".to_string();
        assert!(spec.map_inputs().is_err());
    }

    #[test]
    fn reduce_inputs_one_per_partition() {
        let tmp = temp_dir("reduce_inputs");
        let spec = spec_for(&tmp, 3);

        let inputs = spec.reduce_inputs();
        assert_eq!(inputs.len(), 3);
        assert!(inputs.iter().all(|i| *i == spec.work_dir));
    }

    #[test]
    fn layout_mirrors_spec() {
        let tmp = temp_dir("layout");
        let spec = spec_for(&tmp, 5);
        let layout = spec.layout();

        assert_eq!(layout.reduce_partitions, 5);
        assert_eq!(layout.work_dir, spec.work_dir);
        assert_eq!(layout.result_path, spec.result_path);
    }

    #[test]
    fn reset_outputs_clears_previous_run() {
        let tmp = temp_dir("reset");
        let spec = spec_for(&tmp, 2);
        fs::create_dir_all(&spec.work_dir).unwrap();
        fs::write(Path::new(&spec.work_dir).join("map-7-0.jsonl"), "{}").unwrap();
        fs::write(&spec.result_path, "{}").unwrap();

        spec.reset_outputs().unwrap();

        assert!(Path::new(&spec.work_dir).is_dir());
        assert_eq!(fs::read_dir(&spec.work_dir).unwrap().count(), 0);
        assert!(!Path::new(&spec.result_path).exists());

        // sin nada previo tampoco falla
        fs::remove_dir_all(&spec.work_dir).unwrap();
        spec.reset_outputs().unwrap();
        assert!(Path::new(&spec.work_dir).is_dir());
    }

    #[test]
    fn rerun_does_not_count_stale_intermediates() {
        let tmp = temp_dir("rerun");
        let a = tmp.join("a.txt");
        let b = tmp.join("b.txt");
        fs::write(&a, "uno").unwrap();
        fs::write(&b, "uno uno").unwrap();
        let spec = spec_for(&tmp, 1);
        let layout = spec.layout();

        // primera corrida: dos operaciones de map
        spec.reset_outputs().unwrap();
        wordcount::map_file(0, a.to_str().unwrap(), &layout).unwrap();
        wordcount::map_file(1, b.to_str().unwrap(), &layout).unwrap();
        wordcount::reduce_partition(0, &spec.work_dir, &layout).unwrap();
        assert_eq!(read_results(&spec.result_path).unwrap()["uno"], "3");

        // segunda corrida: sólo a.txt
        fs::remove_file(&b).unwrap();
        spec.reset_outputs().unwrap();
        wordcount::map_file(0, a.to_str().unwrap(), &layout).unwrap();
        wordcount::reduce_partition(0, &spec.work_dir, &layout).unwrap();
        assert_eq!(read_results(&spec.result_path).unwrap()["uno"], "1");
    }
}
