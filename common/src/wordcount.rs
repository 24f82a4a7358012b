use anyhow::{Context, Result};
use glob::glob;
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    fs::{self, File},
    hash::{Hash, Hasher},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::job::JobLayout;
use crate::operation::OperationId;
use crate::results::{append_results, ResultRecord};

/// Normaliza un token: sólo alfanumérico y '_', en minúscula.
fn clean_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// Cuenta palabras de un lector de texto.
pub fn count_words<R: BufRead>(reader: R) -> Result<HashMap<String, u64>> {
    let mut counts: HashMap<String, u64> = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        for raw in line.split_whitespace() {
            let cleaned = clean_token(raw);
            if !cleaned.is_empty() {
                *counts.entry(cleaned).or_insert(0) += 1;
            }
        }
    }

    Ok(counts)
}

/// Partición de reduce a la que va una clave.
pub fn partition_for(key: &str, num_partitions: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_partitions.max(1) as u64) as u32
}

/// Archivo intermedio que deja la operación de map `op` para la partición `partition`.
pub fn intermediate_path(work_dir: &str, op: OperationId, partition: u32) -> PathBuf {
    Path::new(work_dir).join(format!("map-{}-{}.jsonl", op, partition))
}

/// Partición de un nombre tipo "map-{op}-{partition}.jsonl"
fn partition_of(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_prefix("map-")?.strip_suffix(".jsonl")?;
    let (_op, partition) = stem.rsplit_once('-')?;
    partition.parse().ok()
}

/// Operación de map: cuenta palabras de `input_path` y deja un archivo
/// intermedio por partición de reduce.
///
/// Cada archivo se escribe en un temporal y se renombra, así un reintento
/// pisa la salida anterior en vez de duplicarla.
pub fn map_file(op: OperationId, input_path: &str, layout: &JobLayout) -> Result<()> {
    let file = File::open(input_path)
        .with_context(|| format!("no se pudo abrir la entrada {}", input_path))?;
    let counts = count_words(BufReader::new(file))?;

    let partitions = layout.reduce_partitions.max(1);
    let mut buckets: Vec<BTreeMap<String, u64>> = vec![BTreeMap::new(); partitions as usize];
    for (word, count) in counts {
        let p = partition_for(&word, partitions);
        buckets[p as usize].insert(word, count);
    }

    fs::create_dir_all(&layout.work_dir)
        .with_context(|| format!("no se pudo crear {}", layout.work_dir))?;

    for (partition, bucket) in buckets.into_iter().enumerate() {
        let final_path = intermediate_path(&layout.work_dir, op, partition as u32);
        let tmp_path = Path::new(&layout.work_dir).join(format!(
            ".map-{}-{}.{}.tmp",
            op,
            partition,
            std::process::id()
        ));

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for (key, count) in bucket {
            let rec = ResultRecord {
                key,
                value: count.to_string(),
            };
            serde_json::to_writer(&mut writer, &rec)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("no se pudo publicar {}", final_path.display()))?;
    }

    Ok(())
}

/// Operación de reduce: suma los intermedios de `partition` y agrega los
/// totales al archivo de resultados. Devuelve cuántas claves escribió.
pub fn reduce_partition(partition: u32, work_dir: &str, layout: &JobLayout) -> Result<usize> {
    let pattern = format!("{}/map-*-{}.jsonl", work_dir.trim_end_matches('/'), partition);
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();

    for entry in glob(&pattern).with_context(|| format!("patrón inválido {}", pattern))? {
        let path = entry?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if partition_of(&name) != Some(partition) {
            continue;
        }

        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let rec: ResultRecord = serde_json::from_str(&line)
                .with_context(|| format!("intermedio corrupto en {}", path.display()))?;
            let value: u64 = rec
                .value
                .parse()
                .with_context(|| format!("conteo inválido {:?} en {}", rec.value, path.display()))?;
            *totals.entry(rec.key).or_insert(0) += value;
        }
    }

    let records: Vec<ResultRecord> = totals
        .into_iter()
        .map(|(key, total)| ResultRecord {
            key,
            value: total.to_string(),
        })
        .collect();

    append_results(&layout.result_path, &records)?;
    Ok(records.len())
}
