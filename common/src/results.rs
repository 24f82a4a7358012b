use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::Path,
};
use tracing::warn;

/// Una línea del archivo de resultados: `{"Key": "...", "Value": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Reconstruye el mapa clave -> valor leyendo los registros en orden.
/// Si una clave aparece varias veces gana la última; las líneas inválidas se saltan.
pub fn parse_results<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("error leyendo archivo de resultados")?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ResultRecord>(&line) {
            Ok(rec) => {
                out.insert(rec.key, rec.value);
            }
            Err(e) => {
                warn!("línea {} inválida en resultados, se ignora: {:?} ({})", idx + 1, line, e);
            }
        }
    }

    Ok(out)
}

pub fn read_results(path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("no se pudo abrir el archivo de resultados {}", path.display()))?;
    parse_results(BufReader::new(file))
}

/// Agrega registros al final del destino compartido con una sola escritura.
pub fn append_results(path: impl AsRef<Path>, records: &[ResultRecord]) -> Result<()> {
    let path = path.as_ref();
    if records.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut buf = Vec::new();
    for rec in records {
        serde_json::to_writer(&mut buf, rec)?;
        buf.push(b'\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("no se pudo abrir {} para agregar", path.display()))?;
    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}
